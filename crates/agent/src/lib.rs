//! The toolweave run loop.
//!
//! A run follows an **invoke → execute → append** cycle:
//!
//! 1. **Invoke** the model with the accumulated history and tool declarations
//! 2. **Execute** every tool call of the response concurrently, after
//!    validating its arguments
//! 3. **Append** the assistant message and tool results to the history
//!
//! and repeats until the model answers without tool calls, the step budget
//! runs out, a call is deferred to the caller, or the run is aborted.
//!
//! [`StepOrchestrator::stream`] delivers the same run as ordered
//! [`StreamFrame`](toolweave_core::StreamFrame)s, interleaved with the run's
//! side-channel by the [`Multiplexer`].

pub mod codec;
pub mod decode;
pub mod multiplexer;
pub mod orchestrator;
pub mod scripted;

pub use codec::{FrameCodec, FrameCodecError, decode_line, encode_line};
pub use decode::{DecodedError, DecodedRun, DecodedStep, FrameDecoder, decode_frames};
pub use multiplexer::{FrameSender, FrameStream, Multiplexer};
pub use orchestrator::{
    FinishHook, GenerateResult, RunRequest, RunStream, StepHook, StepOrchestrator, Suspension,
};
pub use scripted::{ScriptedModel, ScriptedResponse, ScriptedToolCall, ScriptedTurn};
