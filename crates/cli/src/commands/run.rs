//! `toolweave run`: play a scripted model through the step loop.
//!
//! Streams NDJSON frames to stdout. With `--batch`, prints the aggregate
//! result as JSON instead.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use futures::SinkExt;
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedWrite;
use tracing::{info, warn};

use toolweave_agent::{
    FrameCodec, GenerateResult, RunRequest, RunStream, ScriptedModel, StepOrchestrator,
};
use toolweave_config::AppConfig;
use toolweave_core::{AbortSignal, Message, StreamData, StreamFrame};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON file holding the scripted model responses
    #[arg(short, long)]
    pub script: PathBuf,

    /// The user message that starts the run
    #[arg(short, long, default_value = "Hello")]
    pub prompt: String,

    /// Override orchestrator.max_steps
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Abort the run after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print the aggregate result instead of streaming frames
    #[arg(long)]
    pub batch: bool,
}

pub async fn run(config: AppConfig, args: RunArgs) -> anyhow::Result<()> {
    let script = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| format!("failed to read script {}", args.script.display()))?;
    let model = ScriptedModel::from_json(&script)
        .with_context(|| format!("invalid script {}", args.script.display()))?;
    let tools = toolweave_tools::default_registry()?;

    let mut orchestrator =
        StepOrchestrator::from_config(Arc::new(model), Arc::new(tools), &config)?;
    if let Some(max_steps) = args.max_steps {
        orchestrator = orchestrator.with_max_steps(max_steps);
    }

    let abort = AbortSignal::new();
    if let Some(ms) = args.timeout_ms {
        abort.abort_after(Duration::from_millis(ms));
    }

    let data = StreamData::new();
    let annotations = data.clone();
    let request = RunRequest::new(vec![Message::user(args.prompt)])
        .with_abort(abort)
        .with_data(data.clone())
        .on_step_finish(move |step| {
            annotations.append_message_annotation(json!({
                "step": step.index,
                "toolCalls": step.tool_calls.len(),
                "finishReason": step.finish_reason,
            }));
        });

    info!(
        max_steps = orchestrator.config().max_steps,
        "Starting scripted run"
    );

    if args.batch {
        let result = orchestrator.generate(request).await?;
        report_suspension(&result);
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let RunStream { mut frames, outcome } = orchestrator.stream(request);

    // Left open by the orchestrator, so it has to be closed here or the
    // frame stream never ends.
    let close_after = !config.orchestrator.close_data_on_finish;
    let outcome = tokio::spawn(async move {
        let result = outcome.await;
        if close_after {
            data.close();
        }
        result
    });

    let mut sink = FramedWrite::new(tokio::io::stdout(), FrameCodec::new());
    while let Some(frame) = frames.next().await {
        sink.send(frame).await?;
    }
    SinkExt::<StreamFrame>::close(&mut sink).await?;

    let result = outcome.await??;
    let result = result?;
    report_suspension(&result);
    Ok(())
}

fn report_suspension(result: &GenerateResult) {
    if let Some(suspension) = &result.suspension {
        for call in suspension.pending_calls() {
            warn!(
                tool_call_id = %call.id,
                tool_name = %call.tool_name,
                "Run suspended on deferred tool call"
            );
            eprintln!(
                "pending: {} {} {}",
                call.id, call.tool_name, call.raw_arguments
            );
        }
    }
}
