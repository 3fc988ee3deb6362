//! Model Invocation Interface: the abstraction over LLM backends.
//!
//! A model receives the accumulated history plus the tool declarations and
//! answers with a stream of chunks: text deltas, tool-call deltas, and one
//! final `Finish`. Provider integrations live outside this workspace; the
//! orchestrator only ever talks to this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::abort::AbortSignal;
use crate::error::ModelError;
use crate::message::Message;
use crate::step::{FinishReason, Usage};
use crate::tool::ToolDeclaration;

/// Everything one invocation sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Index of the Step this invocation belongs to
    pub step: usize,

    /// The conversation so far
    pub messages: Vec<Message>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclaration>,
}

/// A single chunk of a streamed model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelChunk {
    /// Partial text
    TextDelta { text: String },

    /// Part of a tool call. Deltas sharing an `id` belong to one call;
    /// `name` only needs to be present on the first of them.
    ToolCallDelta {
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        arguments_delta: String,
    },

    /// End of the response
    Finish {
        finish_reason: FinishReason,
        #[serde(default)]
        usage: Usage,
    },
}

impl ModelChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    /// A complete tool call in one chunk.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::ToolCallDelta {
            id: id.into(),
            name: name.into(),
            arguments_delta: arguments.into(),
        }
    }

    pub fn finish(finish_reason: FinishReason, usage: Usage) -> Self {
        Self::Finish {
            finish_reason,
            usage,
        }
    }
}

/// The receiving end of a model response.
pub type ModelStream = mpsc::Receiver<Result<ModelChunk, ModelError>>;

/// The core model trait.
///
/// Implementations must watch `abort` themselves (e.g. by dropping an
/// in-flight HTTP request) and may end the stream with
/// [`ModelError::Aborted`] when they do.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// A human-readable name for this model (e.g., "scripted", "gpt-4o").
    fn name(&self) -> &str;

    /// Start one invocation and return its chunk stream.
    async fn invoke(
        &self,
        request: ModelRequest,
        abort: AbortSignal,
    ) -> Result<ModelStream, ModelError>;
}
