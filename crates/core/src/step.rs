//! Steps: one model-invoke/tool-execute iteration each.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

use crate::message::{Message, MessageToolCall};
use crate::tool::{ToolCall, ToolOutcome, ToolResult};

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

/// Why a Step or a whole run ended.
///
/// The first group is reported by the model; `MaxSteps` and `Aborted`
/// are assigned by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
    Unknown,
    MaxSteps,
    Aborted,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ContentFilter => "content-filter",
            Self::ToolCalls => "tool-calls",
            Self::Error => "error",
            Self::Other => "other",
            Self::Unknown => "unknown",
            Self::MaxSteps => "max-steps",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One full iteration of the loop.
///
/// Built once by the orchestrator when the iteration settles and never
/// touched again; consumers only ever see shared references or clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Zero-based position of this Step in the run
    pub index: usize,

    /// The history the model was invoked with
    pub input_history: Vec<Message>,

    /// Text the model produced in this Step
    pub text: String,

    /// Tool calls in the order the model emitted them
    pub tool_calls: Vec<ToolCall>,

    /// Results in the same order as `tool_calls`
    pub tool_results: Vec<ToolResult>,

    /// Model-reported finish reason for this Step
    pub finish_reason: FinishReason,

    /// Token usage of this Step's model invocation
    pub usage: Usage,
}

impl Step {
    /// Messages this Step contributes to the next iteration's history.
    ///
    /// Deferred results have no content yet and are left out.
    pub fn response_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(1 + self.tool_results.len());
        messages.push(Message::assistant_with_tool_calls(
            self.text.clone(),
            self.tool_calls
                .iter()
                .map(|c| MessageToolCall {
                    id: c.id.clone(),
                    name: c.tool_name.clone(),
                    arguments: c.raw_arguments.clone(),
                })
                .collect(),
        ));
        for result in &self.tool_results {
            if matches!(result.outcome, ToolOutcome::Deferred) {
                continue;
            }
            messages.push(Message::tool_result(
                &result.tool_call_id,
                &result.tool_name,
                result.outcome.to_model_content(),
            ));
        }
        messages
    }

    /// Calls whose outcome is still owed by the caller.
    pub fn deferred_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.tool_calls.iter().filter(|call| {
            self.tool_results
                .iter()
                .any(|r| r.tool_call_id == call.id && matches!(r.outcome, ToolOutcome::Deferred))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::message::Role;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            tool_name: "weather".into(),
            raw_arguments: r#"{"location":"SF"}"#.into(),
        }
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total += Usage::new(10, 5);
        total += Usage::new(3, 2);
        assert_eq!(total, Usage::new(13, 7));
        assert_eq!(total.total_tokens, 20);
    }

    #[test]
    fn finish_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&FinishReason::MaxSteps).unwrap(),
            r#""max-steps""#
        );
        assert_eq!(FinishReason::ToolCalls.to_string(), "tool-calls");
        let parsed: FinishReason = serde_json::from_str(r#""content-filter""#).unwrap();
        assert_eq!(parsed, FinishReason::ContentFilter);
    }

    #[test]
    fn response_messages_skip_deferred() {
        let step = Step {
            index: 0,
            input_history: vec![Message::user("hi")],
            text: "checking".into(),
            tool_calls: vec![call("a"), call("b"), call("c")],
            tool_results: vec![
                ToolResult::new(&call("a"), ToolOutcome::success(serde_json::json!(1))),
                ToolResult::new(&call("b"), ToolOutcome::Deferred),
                ToolResult::new(
                    &call("c"),
                    ToolOutcome::ValidationFailed {
                        error: ValidationError::single("", "bad"),
                    },
                ),
            ],
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        };

        let messages = step.response_messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].tool_calls.len(), 3);
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("a"));
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("c"));

        let deferred: Vec<_> = step.deferred_calls().map(|c| c.id.as_str()).collect();
        assert_eq!(deferred, vec!["b"]);
    }
}
