//! Rebuilding a run's aggregate from its frames.
//!
//! Frames that carry a `step` are filed under that Step; `text` frames go
//! to the Step opened by the latest `step-start`. Steps that never saw a
//! `step-finish` were interrupted and are dropped, matching the batch
//! result of an aborted run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use toolweave_core::{FinishReason, StreamFrame, ToolCall, ToolOutcome, ToolResult, Usage};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedStep {
    pub index: usize,
    pub message_id: Option<String>,
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Usage,
    pub is_continued: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedError {
    pub kind: String,
    pub message: String,
    pub step: Option<usize>,
}

/// What a consumer can know about a run from its frames alone.
///
/// `text`, `tool_calls` and `tool_results` describe the last finished Step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedRun {
    pub steps: Vec<DecodedStep>,
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Usage,
    pub aborted: bool,
    pub data: Vec<Value>,
    pub annotations: Vec<Value>,
    pub error: Option<DecodedError>,
}

impl DecodedRun {
    /// Whether a terminal frame was seen.
    pub fn is_complete(&self) -> bool {
        self.finish_reason.is_some() || self.error.is_some()
    }
}

/// Incremental decoder: feed frames with [`push`](Self::push), then
/// [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    run: DecodedRun,
    current: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: StreamFrame) {
        match frame {
            StreamFrame::StepStart { step, message_id } => {
                self.step_mut(step).message_id = Some(message_id);
                self.current = Some(step);
            }
            StreamFrame::Text { value } => {
                let step = self.current.unwrap_or_default();
                self.step_mut(step).text.push_str(&value);
            }
            StreamFrame::ToolCall {
                step,
                tool_call_id,
                tool_name,
                args,
                raw_arguments,
            } => {
                let raw_arguments = raw_arguments.unwrap_or_else(|| match args {
                    Value::String(raw) => raw,
                    other => other.to_string(),
                });
                self.step_mut(step).tool_calls.push(ToolCall {
                    id: tool_call_id,
                    tool_name,
                    raw_arguments,
                });
            }
            StreamFrame::ToolResult {
                step,
                tool_call_id,
                tool_name,
                outcome,
            } => {
                let results = &mut self.step_mut(step).tool_results;
                match results.iter_mut().find(|r| r.tool_call_id == tool_call_id) {
                    Some(existing) => existing.outcome = outcome,
                    None => results.push(ToolResult {
                        tool_call_id,
                        tool_name,
                        outcome,
                    }),
                }
            }
            StreamFrame::Data { value } => self.run.data.push(value),
            StreamFrame::MessageAnnotation { value } => self.run.annotations.push(value),
            StreamFrame::StepFinish {
                step,
                finish_reason,
                usage,
                is_continued,
            } => {
                let decoded = self.step_mut(step);
                decoded.finish_reason = Some(finish_reason);
                decoded.usage = usage;
                decoded.is_continued = is_continued;
            }
            StreamFrame::Finish {
                finish_reason,
                usage,
                aborted,
            } => {
                self.run.finish_reason = Some(finish_reason);
                self.run.usage = usage;
                self.run.aborted = aborted;
            }
            StreamFrame::Error {
                kind,
                message,
                step,
            } => {
                self.run.error = Some(DecodedError {
                    kind,
                    message,
                    step,
                });
            }
        }
    }

    pub fn finish(mut self) -> DecodedRun {
        self.run.steps.retain(|s| s.finish_reason.is_some());
        if self.run.finish_reason == Some(FinishReason::ToolCalls)
            && let Some(last) = self.run.steps.last_mut()
        {
            restore_deferred(last);
        }
        if let Some(last) = self.run.steps.last() {
            self.run.text = last.text.clone();
            self.run.tool_calls = last.tool_calls.clone();
            self.run.tool_results = last.tool_results.clone();
        }
        self.run
    }

    fn step_mut(&mut self, index: usize) -> &mut DecodedStep {
        let steps = &mut self.run.steps;
        let position = match steps.binary_search_by_key(&index, |s| s.index) {
            Ok(position) => position,
            Err(position) => {
                steps.insert(
                    position,
                    DecodedStep {
                        index,
                        ..DecodedStep::default()
                    },
                );
                position
            }
        };
        &mut steps[position]
    }
}

/// A run that finished on `tool-calls` is suspended: calls of its last Step
/// without a `tool-result` frame were deferred to the caller.
fn restore_deferred(step: &mut DecodedStep) {
    let mut framed = std::mem::take(&mut step.tool_results);
    step.tool_results = step
        .tool_calls
        .iter()
        .map(|call| {
            match framed.iter().position(|r| r.tool_call_id == call.id) {
                Some(i) => framed.remove(i),
                None => ToolResult::new(call, ToolOutcome::Deferred),
            }
        })
        .collect();
}

/// Decode a complete frame sequence.
pub fn decode_frames(frames: impl IntoIterator<Item = StreamFrame>) -> DecodedRun {
    let mut decoder = FrameDecoder::new();
    for frame in frames {
        decoder.push(frame);
    }
    decoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step_frames(step: usize, text: &str, finish_reason: FinishReason) -> Vec<StreamFrame> {
        vec![
            StreamFrame::StepStart {
                step,
                message_id: format!("msg_{step}"),
            },
            StreamFrame::Text { value: text.into() },
            StreamFrame::StepFinish {
                step,
                finish_reason,
                usage: Usage::new(1, 1),
                is_continued: finish_reason == FinishReason::ToolCalls,
            },
        ]
    }

    #[test]
    fn decodes_steps_and_side_channel() {
        let mut frames = step_frames(0, "thinking", FinishReason::ToolCalls);
        frames.insert(
            2,
            StreamFrame::ToolCall {
                step: 0,
                tool_call_id: "c1".into(),
                tool_name: "weather".into(),
                args: json!({"location": "SF"}),
                raw_arguments: None,
            },
        );
        frames.insert(
            3,
            StreamFrame::ToolResult {
                step: 0,
                tool_call_id: "c1".into(),
                tool_name: "weather".into(),
                outcome: ToolOutcome::success(json!({"temperature": 18})),
            },
        );
        frames.push(StreamFrame::MessageAnnotation { value: json!({"n": 0}) });
        frames.extend(step_frames(1, "Sunny", FinishReason::Stop));
        frames.push(StreamFrame::Data { value: json!([1]) });
        frames.push(StreamFrame::Finish {
            finish_reason: FinishReason::Stop,
            usage: Usage::new(2, 2),
            aborted: false,
        });

        let run = decode_frames(frames);
        assert!(run.is_complete());
        assert_eq!(run.steps.len(), 2);
        assert_eq!(run.steps[0].tool_calls[0].args(), json!({"location": "SF"}));
        assert_eq!(run.steps[0].message_id.as_deref(), Some("msg_0"));
        assert_eq!(run.text, "Sunny");
        assert!(run.tool_calls.is_empty());
        assert_eq!(run.finish_reason, Some(FinishReason::Stop));
        assert_eq!(run.usage.total_tokens, 4);
        assert_eq!(run.annotations, vec![json!({"n": 0})]);
        assert_eq!(run.data, vec![json!([1])]);
    }

    #[test]
    fn unfinished_step_is_dropped() {
        let mut frames = step_frames(0, "done", FinishReason::ToolCalls);
        frames.push(StreamFrame::StepStart {
            step: 1,
            message_id: "msg_1".into(),
        });
        frames.push(StreamFrame::Text { value: "half".into() });
        frames.push(StreamFrame::Finish {
            finish_reason: FinishReason::Aborted,
            usage: Usage::new(1, 1),
            aborted: true,
        });

        let run = decode_frames(frames);
        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.text, "done");
        assert!(run.aborted);
    }

    #[test]
    fn error_frame_is_captured() {
        let run = decode_frames(vec![StreamFrame::Error {
            kind: "ModelInvocationError".into(),
            message: "boom".into(),
            step: Some(0),
        }]);
        assert!(run.is_complete());
        assert_eq!(run.finish_reason, None);
        assert_eq!(run.error.unwrap().step, Some(0));
    }

    #[test]
    fn unparseable_args_keep_their_raw_text() {
        let run = decode_frames(vec![
            StreamFrame::ToolCall {
                step: 0,
                tool_call_id: "c1".into(),
                tool_name: "x".into(),
                args: Value::String("{oops".into()),
                raw_arguments: None,
            },
            StreamFrame::StepFinish {
                step: 0,
                finish_reason: FinishReason::ToolCalls,
                usage: Usage::default(),
                is_continued: false,
            },
        ]);
        assert_eq!(run.tool_calls[0].raw_arguments, "{oops");
    }

    #[test]
    fn raw_argument_text_is_kept_verbatim() {
        let run = decode_frames(vec![
            StreamFrame::ToolCall {
                step: 0,
                tool_call_id: "c1".into(),
                tool_name: "weather".into(),
                args: json!({"location": "SF"}),
                raw_arguments: Some(r#"{ "location" : "SF" }"#.into()),
            },
            StreamFrame::StepFinish {
                step: 0,
                finish_reason: FinishReason::ToolCalls,
                usage: Usage::default(),
                is_continued: false,
            },
        ]);
        assert_eq!(run.tool_calls[0].raw_arguments, r#"{ "location" : "SF" }"#);
    }

    #[test]
    fn suspended_step_gets_deferred_results_in_call_order() {
        let call = |id: &str, name: &str| StreamFrame::ToolCall {
            step: 0,
            tool_call_id: id.into(),
            tool_name: name.into(),
            args: json!({}),
            raw_arguments: Some(String::new()),
        };
        let run = decode_frames(vec![
            call("q", "ask_user"),
            call("w", "weather"),
            StreamFrame::ToolResult {
                step: 0,
                tool_call_id: "w".into(),
                tool_name: "weather".into(),
                outcome: ToolOutcome::success(json!("sunny")),
            },
            StreamFrame::StepFinish {
                step: 0,
                finish_reason: FinishReason::ToolCalls,
                usage: Usage::default(),
                is_continued: false,
            },
            StreamFrame::Finish {
                finish_reason: FinishReason::ToolCalls,
                usage: Usage::default(),
                aborted: false,
            },
        ]);

        let outcomes: Vec<_> = run.tool_results.iter().map(|r| &r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![&ToolOutcome::Deferred, &ToolOutcome::success(json!("sunny"))]
        );
        assert_eq!(run.tool_results[0].tool_call_id, "q");
    }

    #[test]
    fn skipped_final_calls_are_not_deferred() {
        let run = decode_frames(vec![
            StreamFrame::ToolCall {
                step: 0,
                tool_call_id: "c1".into(),
                tool_name: "weather".into(),
                args: json!({}),
                raw_arguments: None,
            },
            StreamFrame::StepFinish {
                step: 0,
                finish_reason: FinishReason::ToolCalls,
                usage: Usage::default(),
                is_continued: false,
            },
            StreamFrame::Finish {
                finish_reason: FinishReason::MaxSteps,
                usage: Usage::default(),
                aborted: false,
            },
        ]);
        assert!(run.tool_results.is_empty());
    }
}
