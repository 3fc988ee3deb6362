//! # toolweave core
//!
//! Domain types, traits, and error definitions for the toolweave
//! multi-step tool-calling loop. This crate has **no orchestration logic**;
//! it defines the model that the orchestrator and the stream multiplexer
//! are written against.
//!
//! ## Design Philosophy
//!
//! Every collaborator at the edge of the loop is a trait here:
//! - [`LanguageModel`] is the Model Invocation Interface
//! - [`ToolExecutor`] / [`Tool`] are what a declared tool runs
//!
//! Implementations live elsewhere (a provider crate, `toolweave-tools`,
//! or a test double), so the loop can be exercised without any network.

pub mod abort;
pub mod error;
pub mod frame;
pub mod message;
pub mod model;
pub mod schema;
pub mod side_channel;
pub mod step;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use abort::AbortSignal;
pub use error::{
    Error, ModelError, Result, RunError, SchemaError, ToolError, ValidationError, ValidationIssue,
};
pub use frame::StreamFrame;
pub use message::{Message, MessageToolCall, Role};
pub use model::{LanguageModel, ModelChunk, ModelRequest, ModelStream};
pub use schema::{JsonSchema, ParameterSchema, SchemaKind, StructuralSchema, TypedSchema};
pub use side_channel::{SideChannelEvent, StreamData};
pub use step::{FinishReason, Step, Usage};
pub use tool::{
    ExecutionOutcome, FailureKind, Tool, ToolCall, ToolContext, ToolDeclaration, ToolDefinition,
    ToolExecutor, ToolOutcome, ToolRegistry, ToolResult,
};
