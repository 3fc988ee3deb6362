//! The Step Orchestrator.
//!
//! Drives one run as an explicit state machine:
//!
//! ```text
//! AwaitingModel ──▶ ExecutingTools ──▶ AwaitingModel ──▶ ... ──▶ Done
//!       │                 │
//!       └──── Aborted ◀───┘            (Suspended when a call is deferred)
//! ```
//!
//! Steps run strictly one after another. Within a Step every tool call is
//! validated and dispatched concurrently, and the Step only settles once all
//! of them have. Results are reported in call order, not completion order.
//!
//! The abort signal is looked at before each model call, when a model
//! stream completes, and once a Step's tool calls have settled. Nothing in
//! flight is ever killed by the orchestrator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use toolweave_config::{AppConfig, FinalStepTools, OrchestratorConfig, ToolErrorPolicy};
use toolweave_core::{
    AbortSignal, ExecutionOutcome, FinishReason, LanguageModel, Message, ModelChunk, ModelError,
    ModelRequest, ModelStream, RunError, Step, StreamData, StreamFrame, ToolCall, ToolContext,
    ToolDeclaration, ToolError, ToolOutcome, ToolRegistry, ToolResult, Usage,
};

use crate::multiplexer::{FrameSender, FrameStream, Multiplexer};

/// Called once per completed Step, before the next model call.
pub type StepHook = Arc<dyn Fn(&Step) + Send + Sync>;

/// Called once per run, before the `finish` frame.
pub type FinishHook = Arc<dyn Fn(&GenerateResult) + Send + Sync>;

const DEFAULT_FRAME_BUFFER: usize = 128;

/// Per-run inputs.
#[derive(Clone, Default)]
pub struct RunRequest {
    /// Initial history. Ignored by [`StepOrchestrator::resume`], which
    /// rebuilds history from the suspended Step.
    pub messages: Vec<Message>,

    /// The run's cancellation token
    pub abort: AbortSignal,

    /// The run's side-channel
    pub data: StreamData,

    pub on_step_finish: Option<StepHook>,
    pub on_finish: Option<FinishHook>,
}

impl RunRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_data(mut self, data: StreamData) -> Self {
        self.data = data;
        self
    }

    pub fn on_step_finish(mut self, hook: impl Fn(&Step) + Send + Sync + 'static) -> Self {
        self.on_step_finish = Some(Arc::new(hook));
        self
    }

    pub fn on_finish(mut self, hook: impl Fn(&GenerateResult) + Send + Sync + 'static) -> Self {
        self.on_finish = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRequest")
            .field("messages", &self.messages.len())
            .field("abort", &self.abort)
            .field("data", &self.data.len())
            .field("on_step_finish", &self.on_step_finish.is_some())
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}

/// The batch outcome of a run.
///
/// `text`, `tool_calls` and `tool_results` describe the last Step; `usage`
/// is summed over all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResult {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub steps: Vec<Step>,
    pub finish_reason: FinishReason,
    pub usage: Usage,

    /// The run ended because the abort signal fired
    pub aborted: bool,

    /// Set when the last Step is waiting on deferred tool calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension: Option<Suspension>,
}

/// A run paused on deferred tool calls.
///
/// Holds every Step so far; the last one still carries `Deferred` results.
/// Serializable so the caller can park it while the calls are resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suspension {
    pub steps: Vec<Step>,
}

impl Suspension {
    /// The Step left incomplete.
    pub fn step(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Calls the caller owes a result for.
    pub fn pending_calls(&self) -> Vec<&ToolCall> {
        self.steps
            .last()
            .map(|step| step.deferred_calls().collect())
            .unwrap_or_default()
    }
}

/// A streamed run: ordered frames plus the eventual batch outcome.
pub struct RunStream {
    pub frames: FrameStream,
    pub outcome: JoinHandle<Result<GenerateResult, RunError>>,
}

/// Drives the model/tool loop.
///
/// Cheap to clone; a clone shares the model and the registry.
#[derive(Clone)]
pub struct StepOrchestrator {
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
    config: OrchestratorConfig,
    frame_buffer: usize,
}

impl StepOrchestrator {
    /// Create an orchestrator.
    ///
    /// Fails with [`RunError::UnknownTool`] if `active_tools` names a tool
    /// the registry does not hold.
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: Arc<ToolRegistry>,
        mut config: OrchestratorConfig,
    ) -> Result<Self, RunError> {
        if let Some(active) = &config.active_tools {
            tools
                .ensure_known(active.iter().map(String::as_str))
                .map_err(|e| RunError::UnknownTool {
                    name: match e {
                        ToolError::NotFound(name) => name,
                        other => other.to_string(),
                    },
                })?;
        }
        config.max_steps = config.max_steps.max(1);

        Ok(Self {
            model,
            tools,
            config,
            frame_buffer: DEFAULT_FRAME_BUFFER,
        })
    }

    /// Create an orchestrator from the full application config.
    pub fn from_config(
        model: Arc<dyn LanguageModel>,
        tools: Arc<ToolRegistry>,
        config: &AppConfig,
    ) -> Result<Self, RunError> {
        Ok(Self::new(model, tools, config.orchestrator.clone())?
            .with_frame_buffer(config.stream.frame_buffer))
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.config.max_steps = max_steps.max(1);
        self
    }

    pub fn with_tool_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.config.tool_error_policy = policy;
        self
    }

    /// Retry model invocations that fail before the first chunk, up to
    /// `max_retries` extra invocations per Step.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn with_final_step_tools(mut self, policy: FinalStepTools) -> Self {
        self.config.final_step_tools = policy;
        self
    }

    /// Capacity of the bounded channel streamed frames are delivered through.
    pub fn with_frame_buffer(mut self, frame_buffer: usize) -> Self {
        self.frame_buffer = frame_buffer.max(1);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run to completion and return the aggregate.
    pub async fn generate(&self, request: RunRequest) -> Result<GenerateResult, RunError> {
        self.run(&request, Entry::Fresh, Emitter::default()).await
    }

    /// Run in a background task, delivering frames as they are produced.
    ///
    /// The side-channel in `request` is attached to the frame stream. The
    /// stream ends once the run has finished *and* the side-channel is
    /// closed, so with `close_data_on_finish = false` the caller must close
    /// it.
    ///
    /// Frames must be drained: once `frame_buffer` orchestrator frames are
    /// waiting, the run pauses at its next frame until the consumer reads.
    /// Dropping the stream lets the run continue without emitting.
    pub fn stream(&self, request: RunRequest) -> RunStream {
        self.spawn_run(request, Entry::Fresh)
    }

    /// Complete a suspended Step with caller-supplied results and continue.
    ///
    /// `results` must cover exactly the deferred calls of the suspended Step.
    pub async fn resume(
        &self,
        suspension: Suspension,
        results: Vec<ToolResult>,
        request: RunRequest,
    ) -> Result<GenerateResult, RunError> {
        self.run(
            &request,
            Entry::Resume {
                suspension,
                results,
            },
            Emitter::default(),
        )
        .await
    }

    /// Streaming variant of [`resume`](Self::resume).
    pub fn resume_stream(
        &self,
        suspension: Suspension,
        results: Vec<ToolResult>,
        request: RunRequest,
    ) -> RunStream {
        self.spawn_run(
            request,
            Entry::Resume {
                suspension,
                results,
            },
        )
    }

    fn spawn_run(&self, request: RunRequest, entry: Entry) -> RunStream {
        let (tx, frames) = Multiplexer::new(self.frame_buffer).spawn();
        request.data.attach(tx.side_channel());

        let orchestrator = self.clone();
        let outcome = tokio::spawn(async move {
            // Closes the side-channel if the run unwinds, so the stream ends.
            let mut guard = DataGuard {
                data: request.data.clone(),
                armed: true,
            };
            let result = orchestrator
                .run(&request, entry, Emitter::attached(tx))
                .await;
            guard.armed = false;
            result
        });

        RunStream { frames, outcome }
    }

    async fn run(
        &self,
        request: &RunRequest,
        entry: Entry,
        emitter: Emitter,
    ) -> Result<GenerateResult, RunError> {
        let mut run = Run {
            id: Uuid::new_v4().to_string(),
            request,
            emitter,
            declarations: self.tools.declarations(self.config.active_tools.as_deref()),
            history: Vec::new(),
            steps: Vec::new(),
        };

        let outcome = match entry {
            Entry::Fresh => {
                info!(
                    run_id = %run.id,
                    messages = request.messages.len(),
                    tools = run.declarations.len(),
                    max_steps = self.config.max_steps,
                    "Starting run"
                );
                run.history = request.messages.clone();
                self.drive(&mut run, LoopState::AwaitingModel).await
            }
            Entry::Resume {
                suspension,
                results,
            } => match self.resume_state(&mut run, suspension, results).await {
                Ok(state) => self.drive(&mut run, state).await,
                Err(e) => Err(e),
            },
        };

        if let Err(e) = &outcome {
            error!(run_id = %run.id, kind = e.kind(), error = %e, "Run failed");
            run.emitter.emit(StreamFrame::error(e)).await;
            request.data.close();
        }
        outcome
    }

    async fn drive(
        &self,
        run: &mut Run<'_>,
        mut state: LoopState,
    ) -> Result<GenerateResult, RunError> {
        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if run.request.abort.is_aborted() {
                        info!(
                            run_id = %run.id,
                            step = run.steps.len(),
                            "Abort observed before model call"
                        );
                        LoopState::Aborted
                    } else {
                        self.await_model(run).await?
                    }
                }
                LoopState::ExecutingTools(pending) => self.execute_tools(run, pending).await?,
                LoopState::Done(reason) => return Ok(self.finish(run, reason, false).await),
                LoopState::Suspended => {
                    return Ok(self.finish(run, FinishReason::ToolCalls, true).await);
                }
                LoopState::Aborted => {
                    return Ok(self.finish(run, FinishReason::Aborted, false).await);
                }
            };
        }
    }

    /// `AwaitingModel`: invoke the model and collect one full response.
    async fn await_model(&self, run: &mut Run<'_>) -> Result<LoopState, RunError> {
        let index = run.steps.len();
        run.emitter
            .emit(StreamFrame::StepStart {
                step: index,
                message_id: format!("msg_{}", Uuid::new_v4().simple()),
            })
            .await;

        let request = ModelRequest {
            step: index,
            messages: run.history.clone(),
            tools: run.declarations.clone(),
        };
        debug!(
            run_id = %run.id,
            step = index,
            model = self.model.name(),
            messages = request.messages.len(),
            "Invoking model"
        );

        let started = Instant::now();
        let Some((mut chunks, first)) = self.open_stream(run, &request).await? else {
            info!(run_id = %run.id, step = index, "Model invocation aborted");
            return Ok(LoopState::Aborted);
        };

        let mut response = ResponseAccumulator::default();
        let mut next = first;
        while let Some(item) = next {
            match item {
                Ok(chunk) => {
                    if let Some(text) = response.apply(chunk) {
                        run.emitter.emit(StreamFrame::Text { value: text }).await;
                    }
                }
                Err(ModelError::Aborted) => {
                    info!(run_id = %run.id, step = index, "Model stream aborted");
                    return Ok(LoopState::Aborted);
                }
                Err(e) => {
                    warn!(run_id = %run.id, step = index, error = %e, "Model stream failed");
                    return Err(RunError::ModelInvocation {
                        step: index,
                        source: e,
                    });
                }
            }
            next = chunks.recv().await;
        }

        let pending = response.into_pending(index, request.messages);

        if run.request.abort.is_aborted() {
            // The response is kept, its tool calls are never settled.
            info!(
                run_id = %run.id,
                step = index,
                tool_calls = pending.tool_calls.len(),
                "Abort observed at model stream completion, skipping tool calls"
            );
            for call in &pending.tool_calls {
                run.emitter.emit(StreamFrame::tool_call(index, call)).await;
            }
            let step = pending.into_step(Vec::new());
            return Ok(self.complete_step(run, step, LoopState::Aborted).await);
        }

        debug!(
            run_id = %run.id,
            step = index,
            tool_calls = pending.tool_calls.len(),
            finish_reason = %pending.finish_reason,
            duration_ms = started.elapsed().as_millis() as u64,
            "Model response complete"
        );
        Ok(LoopState::ExecutingTools(pending))
    }

    /// Invoke the model, retrying failures that happen before any chunk.
    ///
    /// `None` means the invocation was aborted.
    async fn open_stream(
        &self,
        run: &Run<'_>,
        request: &ModelRequest,
    ) -> Result<Option<OpenedStream>, RunError> {
        let abort = &run.request.abort;
        let mut attempt = 0;
        loop {
            let error = match self.model.invoke(request.clone(), abort.clone()).await {
                Ok(mut chunks) => match chunks.recv().await {
                    Some(Err(e)) => e,
                    first => return Ok(Some((chunks, first))),
                },
                Err(e) => e,
            };

            if matches!(error, ModelError::Aborted) || abort.is_aborted() {
                return Ok(None);
            }
            if error.is_retryable() && attempt < self.config.max_retries {
                attempt += 1;
                warn!(
                    run_id = %run.id,
                    step = request.step,
                    attempt,
                    error = %error,
                    "Model invocation failed before any chunk, retrying"
                );
                continue;
            }
            return Err(RunError::ModelInvocation {
                step: request.step,
                source: error,
            });
        }
    }

    /// `ExecutingTools`: settle every call of the Step, then decide what's next.
    async fn execute_tools(
        &self,
        run: &mut Run<'_>,
        pending: PendingStep,
    ) -> Result<LoopState, RunError> {
        let index = pending.index;
        for call in &pending.tool_calls {
            run.emitter.emit(StreamFrame::tool_call(index, call)).await;
        }

        let last_permitted = index + 1 >= self.config.max_steps;
        let tool_results = if pending.tool_calls.is_empty() {
            Vec::new()
        } else if last_permitted && self.config.final_step_tools == FinalStepTools::Skip {
            info!(
                run_id = %run.id,
                step = index,
                skipped = pending.tool_calls.len(),
                "Skipping tool calls on the last permitted step"
            );
            Vec::new()
        } else {
            self.settle_calls(run, &pending).await?
        };

        for result in tool_results.iter().filter(|r| !r.outcome.is_deferred()) {
            run.emitter.emit(StreamFrame::tool_result(index, result)).await;
        }

        let step = pending.into_step(tool_results);
        let next = self.next_state(&run.request.abort, &step);
        Ok(self.complete_step(run, step, next).await)
    }

    /// Fan out every call of the Step and wait for all of them.
    async fn settle_calls(
        &self,
        run: &Run<'_>,
        pending: &PendingStep,
    ) -> Result<Vec<ToolResult>, RunError> {
        let history: Arc<[Message]> = Arc::from(pending.input_history.as_slice());
        let settled = join_all(
            pending
                .tool_calls
                .iter()
                .map(|call| self.settle_call(run, call, pending.index, history.clone())),
        )
        .await;

        if self.config.tool_error_policy == ToolErrorPolicy::Propagate
            && let Some((call, source)) = pending
                .tool_calls
                .iter()
                .zip(&settled)
                .find_map(|(call, (_, failure))| failure.clone().map(|e| (call, e)))
        {
            return Err(RunError::ToolExecution {
                step: pending.index,
                tool_call_id: call.id.clone(),
                tool_name: call.tool_name.clone(),
                source,
            });
        }

        Ok(settled.into_iter().map(|(result, _)| result).collect())
    }

    /// Validate and dispatch one call.
    ///
    /// The error is returned alongside the result only for executor
    /// failures, which the propagate policy turns fatal.
    async fn settle_call(
        &self,
        run: &Run<'_>,
        call: &ToolCall,
        step: usize,
        history: Arc<[Message]>,
    ) -> (ToolResult, Option<ToolError>) {
        let validated = if self.is_active(&call.tool_name) {
            self.tools.validate(&call.tool_name, &call.raw_arguments)
        } else {
            None
        };

        let arguments = match validated {
            Some(Ok(arguments)) => arguments,
            Some(Err(error)) => {
                debug!(
                    run_id = %run.id,
                    step,
                    tool = %call.tool_name,
                    tool_call_id = %call.id,
                    issues = error.issues.len(),
                    "Tool arguments failed validation"
                );
                return (
                    ToolResult::new(call, ToolOutcome::ValidationFailed { error }),
                    None,
                );
            }
            None => {
                warn!(
                    run_id = %run.id,
                    step,
                    tool = %call.tool_name,
                    tool_call_id = %call.id,
                    "Model called an unknown tool"
                );
                let outcome =
                    ToolOutcome::from_tool_error(&ToolError::NotFound(call.tool_name.clone()));
                return (ToolResult::new(call, outcome), None);
            }
        };

        let ctx = ToolContext {
            tool_call_id: call.id.clone(),
            step,
            history,
            abort: run.request.abort.clone(),
            data: run.request.data.clone(),
        };

        let started = Instant::now();
        let outcome = self.tools.execute(&call.tool_name, arguments, &ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            ExecutionOutcome::Executed(value) => {
                debug!(
                    run_id = %run.id,
                    step,
                    tool = %call.tool_name,
                    tool_call_id = %call.id,
                    duration_ms,
                    "Tool call succeeded"
                );
                (ToolResult::new(call, ToolOutcome::success(value)), None)
            }
            ExecutionOutcome::Deferred => {
                info!(
                    run_id = %run.id,
                    step,
                    tool = %call.tool_name,
                    tool_call_id = %call.id,
                    "Tool call deferred to caller"
                );
                (ToolResult::new(call, ToolOutcome::Deferred), None)
            }
            ExecutionOutcome::Failed(e) => {
                warn!(
                    run_id = %run.id,
                    step,
                    tool = %call.tool_name,
                    tool_call_id = %call.id,
                    duration_ms,
                    error = %e,
                    "Tool call failed"
                );
                let outcome = ToolOutcome::from_tool_error(&e);
                let fatal = !matches!(e, ToolError::NotFound(_) | ToolError::Aborted { .. });
                (ToolResult::new(call, outcome), fatal.then_some(e))
            }
        }
    }

    fn is_active(&self, name: &str) -> bool {
        self.config
            .active_tools
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == name))
    }

    fn next_state(&self, abort: &AbortSignal, step: &Step) -> LoopState {
        if step.tool_calls.is_empty() {
            LoopState::Done(step.finish_reason)
        } else if abort.is_aborted() {
            LoopState::Aborted
        } else if step.deferred_calls().next().is_some() {
            LoopState::Suspended
        } else if step.index + 1 >= self.config.max_steps {
            LoopState::Done(FinishReason::MaxSteps)
        } else {
            LoopState::AwaitingModel
        }
    }

    /// Record a settled Step and emit its `step-finish` frame.
    async fn complete_step(&self, run: &mut Run<'_>, step: Step, next: LoopState) -> LoopState {
        let is_continued = matches!(next, LoopState::AwaitingModel);
        run.emitter
            .emit(StreamFrame::step_finish(&step, is_continued))
            .await;
        info!(
            run_id = %run.id,
            step = step.index,
            finish_reason = %step.finish_reason,
            tool_calls = step.tool_calls.len(),
            prompt_tokens = step.usage.prompt_tokens,
            completion_tokens = step.usage.completion_tokens,
            "Step finished"
        );

        // A suspended Step is not complete yet; its hook runs on resume.
        if !matches!(next, LoopState::Suspended)
            && let Some(hook) = &run.request.on_step_finish
        {
            hook(&step);
        }

        if is_continued {
            run.history.extend(step.response_messages());
        }
        run.steps.push(step);
        next
    }

    /// Patch the suspended Step with caller results and pick the next state.
    async fn resume_state(
        &self,
        run: &mut Run<'_>,
        suspension: Suspension,
        results: Vec<ToolResult>,
    ) -> Result<LoopState, RunError> {
        let mut steps = suspension.steps;
        let Some(mut step) = steps.pop() else {
            return Err(invalid_resume("the suspension holds no steps"));
        };

        let pending: Vec<String> = step.deferred_calls().map(|c| c.id.clone()).collect();
        if pending.is_empty() {
            return Err(invalid_resume(format!(
                "step {} has no deferred tool calls",
                step.index
            )));
        }

        let mut supplied: HashMap<String, ToolOutcome> = HashMap::with_capacity(results.len());
        for result in results {
            if !pending.contains(&result.tool_call_id) {
                return Err(invalid_resume(format!(
                    "tool call '{}' is not awaiting a result",
                    result.tool_call_id
                )));
            }
            if result.outcome.is_deferred() {
                return Err(invalid_resume(format!(
                    "result for tool call '{}' is still deferred",
                    result.tool_call_id
                )));
            }
            if supplied
                .insert(result.tool_call_id.clone(), result.outcome)
                .is_some()
            {
                return Err(invalid_resume(format!(
                    "duplicate result for tool call '{}'",
                    result.tool_call_id
                )));
            }
        }
        if let Some(missing) = pending.iter().find(|id| !supplied.contains_key(*id)) {
            return Err(invalid_resume(format!(
                "missing result for tool call '{missing}'"
            )));
        }

        info!(
            run_id = %run.id,
            step = step.index,
            resolved = pending.len(),
            "Resuming suspended run"
        );

        for slot in step.tool_results.iter_mut() {
            if let Some(outcome) = supplied.remove(&slot.tool_call_id) {
                slot.outcome = outcome;
                run.emitter
                    .emit(StreamFrame::tool_result(step.index, slot))
                    .await;
            }
        }

        run.history = step.input_history.clone();
        run.steps = steps;
        let next = self.next_state(&run.request.abort, &step);
        Ok(self.complete_step(run, step, next).await)
    }

    /// Build the aggregate, run the finish hook, and emit `finish`.
    async fn finish(
        &self,
        run: &mut Run<'_>,
        finish_reason: FinishReason,
        suspended: bool,
    ) -> GenerateResult {
        let steps = std::mem::take(&mut run.steps);
        let usage = steps
            .iter()
            .fold(Usage::default(), |total, step| total + step.usage);
        let last = steps.last();
        let aborted = finish_reason == FinishReason::Aborted;

        let result = GenerateResult {
            text: last.map(|s| s.text.clone()).unwrap_or_default(),
            tool_calls: last.map(|s| s.tool_calls.clone()).unwrap_or_default(),
            tool_results: last.map(|s| s.tool_results.clone()).unwrap_or_default(),
            suspension: suspended.then(|| Suspension {
                steps: steps.clone(),
            }),
            steps,
            finish_reason,
            usage,
            aborted,
        };

        info!(
            run_id = %run.id,
            steps = result.steps.len(),
            finish_reason = %finish_reason,
            aborted,
            suspended,
            total_tokens = usage.total_tokens,
            abort_reason = run.request.abort.reason().unwrap_or_default(),
            "Run finished"
        );

        if let Some(hook) = &run.request.on_finish {
            hook(&result);
        }
        if self.config.close_data_on_finish {
            run.request.data.close();
        }
        run.emitter
            .emit(StreamFrame::Finish {
                finish_reason,
                usage,
                aborted,
            })
            .await;

        result
    }
}

fn invalid_resume(reason: impl Into<String>) -> RunError {
    RunError::InvalidResume {
        reason: reason.into(),
    }
}

type OpenedStream = (ModelStream, Option<Result<ModelChunk, ModelError>>);

enum Entry {
    Fresh,
    Resume {
        suspension: Suspension,
        results: Vec<ToolResult>,
    },
}

enum LoopState {
    AwaitingModel,
    ExecutingTools(PendingStep),
    Done(FinishReason),
    Suspended,
    Aborted,
}

/// Mutable state of one run. Only the orchestrator's own loop touches it.
struct Run<'a> {
    id: String,
    request: &'a RunRequest,
    emitter: Emitter,
    declarations: Vec<ToolDeclaration>,
    history: Vec<Message>,
    steps: Vec<Step>,
}

/// Where the orchestrator writes frames. Detached for batch runs.
#[derive(Default)]
struct Emitter {
    sink: Option<FrameSender>,
}

impl Emitter {
    fn attached(sink: FrameSender) -> Self {
        Self { sink: Some(sink) }
    }

    async fn emit(&self, frame: StreamFrame) {
        if let Some(sink) = &self.sink
            && !sink.send(frame).await
        {
            debug!("Frame consumer went away");
        }
    }
}

struct DataGuard {
    data: StreamData,
    armed: bool,
}

impl Drop for DataGuard {
    fn drop(&mut self) {
        if self.armed {
            self.data.close();
        }
    }
}

/// A model response collected, tool calls not yet settled.
struct PendingStep {
    index: usize,
    input_history: Vec<Message>,
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: FinishReason,
    usage: Usage,
}

impl PendingStep {
    fn into_step(self, tool_results: Vec<ToolResult>) -> Step {
        Step {
            index: self.index,
            input_history: self.input_history,
            text: self.text,
            tool_calls: self.tool_calls,
            tool_results,
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

/// Folds model chunks into text and tool calls.
///
/// Tool-call deltas are merged by id; the order in which ids first appear
/// is the order of the Step's tool calls.
#[derive(Default)]
struct ResponseAccumulator {
    text: String,
    tool_calls: Vec<ToolCall>,
    positions: HashMap<String, usize>,
    finish: Option<(FinishReason, Usage)>,
}

impl ResponseAccumulator {
    /// Returns the text delta to forward, if any.
    fn apply(&mut self, chunk: ModelChunk) -> Option<String> {
        match chunk {
            ModelChunk::TextDelta { text } => {
                if text.is_empty() {
                    return None;
                }
                self.text.push_str(&text);
                Some(text)
            }
            ModelChunk::ToolCallDelta {
                id,
                name,
                arguments_delta,
            } => {
                if let Some(call) = self
                    .positions
                    .get(&id)
                    .and_then(|&i| self.tool_calls.get_mut(i))
                {
                    if call.tool_name.is_empty() {
                        call.tool_name = name;
                    }
                    call.raw_arguments.push_str(&arguments_delta);
                } else {
                    self.positions.insert(id.clone(), self.tool_calls.len());
                    self.tool_calls.push(ToolCall {
                        id,
                        tool_name: name,
                        raw_arguments: arguments_delta,
                    });
                }
                None
            }
            ModelChunk::Finish {
                finish_reason,
                usage,
            } => {
                self.finish = Some((finish_reason, usage));
                None
            }
        }
    }

    fn into_pending(self, index: usize, input_history: Vec<Message>) -> PendingStep {
        let (finish_reason, usage) = self.finish.unwrap_or_else(|| {
            let reason = if self.tool_calls.is_empty() {
                FinishReason::Unknown
            } else {
                FinishReason::ToolCalls
            };
            (reason, Usage::default())
        });
        PendingStep {
            index,
            input_history,
            text: self.text,
            tool_calls: self.tool_calls,
            finish_reason,
            usage,
        }
    }
}
