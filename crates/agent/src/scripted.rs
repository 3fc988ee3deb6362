//! A [`LanguageModel`] that replays a script.
//!
//! Each invocation takes the next [`ScriptedTurn`] off the queue: a response
//! to stream, an error to fail with, or a hang that only ends when the run
//! is aborted. Used by the tests and by `toolweave run`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use toolweave_core::{
    AbortSignal, FinishReason, LanguageModel, ModelChunk, ModelError, ModelRequest, ModelStream,
    Usage,
};

/// One scripted tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedToolCall {
    pub id: String,
    pub name: String,

    /// Arguments as JSON
    #[serde(default)]
    pub arguments: Value,

    /// Exact argument text to send instead of `arguments`, e.g. broken JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_arguments: Option<String>,
}

impl ScriptedToolCall {
    fn argument_text(&self) -> String {
        match (&self.raw_arguments, &self.arguments) {
            (Some(raw), _) => raw.clone(),
            (None, Value::Null) => String::new(),
            (None, value) => value.to_string(),
        }
    }
}

/// One model response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedResponse {
    /// Text deltas, streamed in order
    #[serde(default)]
    pub text: Vec<String>,

    #[serde(default)]
    pub tool_calls: Vec<ScriptedToolCall>,

    /// Defaults to `tool-calls` when there are calls, `stop` otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    #[serde(default)]
    pub usage: Usage,
}

impl ScriptedResponse {
    /// A plain text answer.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: vec![text.into()],
            usage: Usage::new(10, 5),
            ..Self::default()
        }
    }

    /// A response requesting `(id, name, arguments)` tool calls.
    pub fn tool_calls<'a>(calls: impl IntoIterator<Item = (&'a str, &'a str, Value)>) -> Self {
        Self {
            tool_calls: calls
                .into_iter()
                .map(|(id, name, arguments)| ScriptedToolCall {
                    id: id.into(),
                    name: name.into(),
                    arguments,
                    raw_arguments: None,
                })
                .collect(),
            usage: Usage::new(10, 5),
            ..Self::default()
        }
    }

    /// Stream this text ahead of the tool calls.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text.push(text.into());
        self
    }

    /// Add a call whose argument text is sent verbatim.
    pub fn with_raw_call(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        raw_arguments: impl Into<String>,
    ) -> Self {
        self.tool_calls.push(ScriptedToolCall {
            id: id.into(),
            name: name.into(),
            arguments: Value::Null,
            raw_arguments: Some(raw_arguments.into()),
        });
        self
    }

    fn finish_reason(&self) -> FinishReason {
        self.finish_reason.unwrap_or(if self.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        })
    }

    /// The chunk sequence a provider would stream for this response.
    ///
    /// Tool-call arguments are split over two deltas, the second carrying
    /// only the id.
    pub fn chunks(&self) -> Vec<ModelChunk> {
        let mut chunks: Vec<ModelChunk> = self.text.iter().map(ModelChunk::text).collect();
        for call in &self.tool_calls {
            let arguments = call.argument_text();
            let middle = arguments
                .char_indices()
                .nth(arguments.chars().count() / 2)
                .map_or(arguments.len(), |(i, _)| i);
            let (head, tail) = arguments.split_at(middle);
            chunks.push(ModelChunk::tool_call(&call.id, &call.name, head));
            if !tail.is_empty() {
                chunks.push(ModelChunk::tool_call(&call.id, "", tail));
            }
        }
        chunks.push(ModelChunk::finish(self.finish_reason(), self.usage));
        chunks
    }
}

/// What one invocation does.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Stream a full response
    Respond(ScriptedResponse),
    /// Fail before streaming anything
    Fail(ModelError),
    /// Stream the response's text, then fail
    FailMidStream {
        response: ScriptedResponse,
        error: ModelError,
    },
    /// Stream nothing until the run is aborted
    HangUntilAborted,
}

impl From<ScriptedResponse> for ScriptedTurn {
    fn from(response: ScriptedResponse) -> Self {
        Self::Respond(response)
    }
}

pub struct ScriptedModel {
    name: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    invocations: AtomicUsize,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            name: "scripted".into(),
            turns: Mutex::new(turns.into()),
            invocations: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_responses(responses: Vec<ScriptedResponse>) -> Self {
        Self::new(responses.into_iter().map(ScriptedTurn::Respond).collect())
    }

    /// Parse a JSON array of [`ScriptedResponse`]s.
    pub fn from_json(script: &str) -> Result<Self, serde_json::Error> {
        let responses: Vec<ScriptedResponse> = serde_json::from_str(script)?;
        Ok(Self::from_responses(responses))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a turn to the end of the script.
    pub fn push(&self, turn: impl Into<ScriptedTurn>) {
        lock(&self.turns).push_back(turn.into());
    }

    /// How many times `invoke` was called.
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }

    /// Turns not yet played.
    pub fn remaining(&self) -> usize {
        lock(&self.turns).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        request: ModelRequest,
        abort: AbortSignal,
    ) -> Result<ModelStream, ModelError> {
        let invocation = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        let step = request.step;
        lock(&self.requests).push(request);

        let Some(turn) = lock(&self.turns).pop_front() else {
            return Err(ModelError::InvalidResponse(format!(
                "script exhausted after {} invocations",
                invocation - 1
            )));
        };
        debug!(model = %self.name, invocation, step, "Playing scripted turn");

        let (chunks, error) = match turn {
            ScriptedTurn::Fail(e) => return Err(e),
            ScriptedTurn::HangUntilAborted => {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(async move {
                    abort.aborted().await;
                    let _ = tx.send(Err(ModelError::Aborted)).await;
                });
                return Ok(rx);
            }
            ScriptedTurn::Respond(response) => (response.chunks(), None),
            ScriptedTurn::FailMidStream { response, error } => {
                let text: Vec<ModelChunk> =
                    response.text.into_iter().map(ModelChunk::text).collect();
                (text, Some(error))
            }
        };

        let (tx, rx) = mpsc::channel(chunks.len() + 1);
        tokio::spawn(async move {
            for chunk in chunks {
                if abort.is_aborted() {
                    let _ = tx.send(Err(ModelError::Aborted)).await;
                    return;
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            if let Some(e) = error {
                let _ = tx.send(Err(e)).await;
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ModelRequest {
        ModelRequest {
            step: 0,
            messages: vec![],
            tools: vec![],
        }
    }

    async fn drain(mut rx: ModelStream) -> Vec<Result<ModelChunk, ModelError>> {
        let mut items = vec![];
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[test]
    fn arguments_are_split_across_deltas() {
        let response = ScriptedResponse::tool_calls(vec![("c1", "weather", json!({"location": "SF"}))]);
        let chunks = response.chunks();
        assert_eq!(chunks.len(), 3);
        let mut joined = String::new();
        for chunk in &chunks[..2] {
            match chunk {
                ModelChunk::ToolCallDelta { id, arguments_delta, .. } => {
                    assert_eq!(id, "c1");
                    joined.push_str(arguments_delta);
                }
                other => panic!("Expected ToolCallDelta, got {other:?}"),
            }
        }
        assert_eq!(joined, r#"{"location":"SF"}"#);
        assert_eq!(
            chunks[2],
            ModelChunk::finish(FinishReason::ToolCalls, Usage::new(10, 5))
        );
    }

    #[test]
    fn script_parses_from_json() {
        let model = ScriptedModel::from_json(
            r#"[
                {"tool_calls": [{"id": "c1", "name": "weather_lookup", "arguments": {"location": "SF"}}]},
                {"text": ["It is ", "sunny."], "usage": {"promptTokens": 3, "completionTokens": 2, "totalTokens": 5}}
            ]"#,
        )
        .unwrap();
        assert_eq!(model.remaining(), 2);
    }

    #[tokio::test]
    async fn replays_turns_and_counts_invocations() {
        let model = ScriptedModel::new(vec![
            ScriptedResponse::text("hello").into(),
            ScriptedTurn::Fail(ModelError::Network("down".into())),
        ]);

        let items = drain(model.invoke(request(), AbortSignal::new()).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Ok(ModelChunk::TextDelta { text }) if text == "hello"));

        let err = model.invoke(request(), AbortSignal::new()).await.unwrap_err();
        assert!(matches!(err, ModelError::Network(_)));

        let err = model.invoke(request(), AbortSignal::new()).await.unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse(_)));
        assert_eq!(model.invocation_count(), 3);
        assert_eq!(model.requests().len(), 3);
    }

    #[tokio::test]
    async fn hang_ends_on_abort() {
        let model = ScriptedModel::new(vec![ScriptedTurn::HangUntilAborted]);
        let abort = AbortSignal::new();
        let rx = model.invoke(request(), abort.clone()).await.unwrap();
        abort.abort("test");
        let items = drain(rx).await;
        assert!(matches!(items.as_slice(), [Err(ModelError::Aborted)]));
    }

    #[tokio::test]
    async fn fail_mid_stream_sends_text_first() {
        let model = ScriptedModel::new(vec![ScriptedTurn::FailMidStream {
            response: ScriptedResponse::text("par"),
            error: ModelError::StreamInterrupted("reset".into()),
        }]);
        let items = drain(model.invoke(request(), AbortSignal::new()).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ModelError::StreamInterrupted(_))));
    }
}
