//! Output frames: the wire unit of a streamed run.
//!
//! Each frame is a self-contained record tagged by `type`, so a consumer
//! can parse the stream incrementally, one record at a time:
//! - `step-start`: first frame of a Step
//! - `text`: text delta from the model
//! - `tool-call`: a tool call, tagged with its Step
//! - `tool-result`: a resolved tool call, tagged with its Step
//! - `data`: side-channel data
//! - `message-annotation`: side-channel annotation
//! - `step-finish`: a Step settled
//! - `finish`: the run ended normally (always last)
//! - `error`: the run failed (always last)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RunError;
use crate::step::{FinishReason, Step, Usage};
use crate::tool::{ToolCall, ToolOutcome, ToolResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamFrame {
    StepStart {
        step: usize,
        message_id: String,
    },

    Text {
        value: String,
    },

    ToolCall {
        step: usize,
        tool_call_id: String,
        tool_name: String,
        args: Value,
        /// Argument text exactly as the model produced it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_arguments: Option<String>,
    },

    ToolResult {
        step: usize,
        tool_call_id: String,
        tool_name: String,
        outcome: ToolOutcome,
    },

    Data {
        value: Value,
    },

    MessageAnnotation {
        value: Value,
    },

    StepFinish {
        step: usize,
        finish_reason: FinishReason,
        usage: Usage,
        is_continued: bool,
    },

    Finish {
        finish_reason: FinishReason,
        usage: Usage,
        aborted: bool,
    },

    Error {
        kind: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<usize>,
    },
}

impl StreamFrame {
    pub fn tool_call(step: usize, call: &ToolCall) -> Self {
        Self::ToolCall {
            step,
            tool_call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            args: call.args(),
            raw_arguments: Some(call.raw_arguments.clone()),
        }
    }

    pub fn tool_result(step: usize, result: &ToolResult) -> Self {
        Self::ToolResult {
            step,
            tool_call_id: result.tool_call_id.clone(),
            tool_name: result.tool_name.clone(),
            outcome: result.outcome.clone(),
        }
    }

    pub fn step_finish(step: &Step, is_continued: bool) -> Self {
        Self::StepFinish {
            step: step.index,
            finish_reason: step.finish_reason,
            usage: step.usage,
            is_continued,
        }
    }

    pub fn error(err: &RunError) -> Self {
        Self::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
            step: err.step(),
        }
    }

    /// The `type` discriminant of this frame.
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::StepStart { .. } => "step-start",
            Self::Text { .. } => "text",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::Data { .. } => "data",
            Self::MessageAnnotation { .. } => "message-annotation",
            Self::StepFinish { .. } => "step-finish",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this frame ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }

    /// Whether this frame came from the side-channel.
    pub fn is_side_channel(&self) -> bool {
        matches!(self, Self::Data { .. } | Self::MessageAnnotation { .. })
    }
}
