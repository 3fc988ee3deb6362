//! End-to-end tests for the `toolweave` binary.
//!
//! Each test writes a model script to a temp dir, runs the binary with
//! `HOME` pointed at another temp dir so no user config leaks in, and
//! checks the frames it prints.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::{Value, json};
use toolweave_agent::{decode_frames, decode_line};
use toolweave_core::{FinishReason, StreamFrame};

// ── Helpers ──────────────────────────────────────────────────────────────

fn toolweave(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_toolweave"))
        .args(args)
        .env("HOME", home)
        .env_remove("TOOLWEAVE_CONFIG")
        .env_remove("TOOLWEAVE_MAX_STEPS")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run toolweave")
}

fn write_script(dir: &Path, script: Value) -> String {
    let path = dir.join("script.json");
    std::fs::write(&path, serde_json::to_string(&script).unwrap()).unwrap();
    path.to_str().unwrap().to_string()
}

fn frames(output: &Output) -> Vec<StreamFrame> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| decode_line(line).expect("stdout line is not a frame"))
        .collect()
}

fn weather_script() -> Value {
    json!([
        {
            "text": ["Let me check."],
            "tool_calls": [
                {"id": "call_1", "name": "weather_lookup", "arguments": {"location": "San Francisco"}}
            ]
        },
        {
            "text": ["It is ", "mild in San Francisco."]
        }
    ])
}

// ── run ──────────────────────────────────────────────────────────────────

#[test]
fn run_streams_weather_scenario() {
    let home = tempfile::tempdir().unwrap();
    let script = write_script(home.path(), weather_script());

    let output = toolweave(home.path(), &["run", "--script", &script, "--prompt", "Weather?"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let frames = frames(&output);
    assert!(matches!(frames.first(), Some(StreamFrame::StepStart { step: 0, .. })));
    assert!(matches!(
        frames.last(),
        Some(StreamFrame::Finish { finish_reason: FinishReason::Stop, aborted: false, .. })
    ));

    let run = decode_frames(frames);
    assert_eq!(run.steps.len(), 2);
    assert_eq!(run.text, "It is mild in San Francisco.");
    assert_eq!(run.steps[0].tool_results.len(), 1);
    assert!(run.steps[0].tool_results[0].outcome.is_success());

    // One annotation from the step hook per completed Step
    assert_eq!(run.annotations.len(), 2);
    // The weather tool reports its data source on the side-channel
    assert_eq!(run.data.len(), 1);
}

#[test]
fn run_respects_max_steps_flag() {
    let home = tempfile::tempdir().unwrap();
    let script = write_script(home.path(), weather_script());

    let output = toolweave(home.path(), &["run", "--script", &script, "--max-steps", "1"]);
    assert!(output.status.success());

    let run = decode_frames(frames(&output));
    assert_eq!(run.steps.len(), 1);
    assert_eq!(run.finish_reason, Some(FinishReason::MaxSteps));
    // Tools still run on the final Step
    assert_eq!(run.tool_results.len(), 1);
}

#[test]
fn run_batch_prints_aggregate() {
    let home = tempfile::tempdir().unwrap();
    let script = write_script(home.path(), weather_script());

    let output = toolweave(home.path(), &["run", "--script", &script, "--batch"]);
    assert!(output.status.success());

    let result: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["finishReason"], "stop");
    assert_eq!(result["steps"].as_array().unwrap().len(), 2);
    assert_eq!(result["usage"]["totalTokens"], 0);
    assert_eq!(result["aborted"], false);
}

#[test]
fn run_with_exhausted_script_fails_with_error_frame() {
    let home = tempfile::tempdir().unwrap();
    let script = write_script(
        home.path(),
        json!([
            {"tool_calls": [{"id": "call_1", "name": "weather_lookup", "arguments": {"location": "Paris"}}]}
        ]),
    );

    let output = toolweave(home.path(), &["run", "--script", &script]);
    assert!(!output.status.success());

    let frames = frames(&output);
    match frames.last() {
        Some(StreamFrame::Error { kind, step, .. }) => {
            assert_eq!(kind, "ModelInvocationError");
            assert_eq!(*step, Some(1));
        }
        other => panic!("expected error frame, got {other:?}"),
    }
}

#[test]
fn run_suspends_on_ask_user() {
    let home = tempfile::tempdir().unwrap();
    let script = write_script(
        home.path(),
        json!([
            {"tool_calls": [{"id": "call_q", "name": "ask_user", "arguments": {"question": "Which city?"}}]}
        ]),
    );

    let output = toolweave(home.path(), &["run", "--script", &script]);
    assert!(output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("pending: call_q ask_user"), "stderr: {stderr}");

    let frames = frames(&output);
    assert!(
        !frames
            .iter()
            .any(|f| matches!(f, StreamFrame::ToolResult { .. })),
        "deferred calls must not produce result frames"
    );
    assert!(matches!(
        frames.last(),
        Some(StreamFrame::Finish { finish_reason: FinishReason::ToolCalls, .. })
    ));
}

#[test]
fn run_uses_config_file() {
    let home = tempfile::tempdir().unwrap();
    let script = write_script(home.path(), weather_script());
    let config = home.path().join("custom.toml");
    std::fs::write(&config, "[orchestrator]\nmax_steps = 1\n").unwrap();

    let output = toolweave(
        home.path(),
        &["--config", config.to_str().unwrap(), "run", "--script", &script],
    );
    assert!(output.status.success());
    let run = decode_frames(frames(&output));
    assert_eq!(run.finish_reason, Some(FinishReason::MaxSteps));
}

// ── decode ───────────────────────────────────────────────────────────────

#[test]
fn decode_rebuilds_what_run_printed() {
    let home = tempfile::tempdir().unwrap();
    let script = write_script(home.path(), weather_script());

    let output = toolweave(home.path(), &["run", "--script", &script]);
    let frames_path = home.path().join("frames.ndjson");
    std::fs::write(&frames_path, &output.stdout).unwrap();

    let decoded = toolweave(
        home.path(),
        &["decode", "--input", frames_path.to_str().unwrap()],
    );
    assert!(decoded.status.success());

    let run: Value = serde_json::from_slice(&decoded.stdout).unwrap();
    assert_eq!(run["finishReason"], "stop");
    assert_eq!(run["text"], "It is mild in San Francisco.");
    assert_eq!(run["steps"].as_array().unwrap().len(), 2);
}

// ── config ───────────────────────────────────────────────────────────────

#[test]
fn config_default_prints_toml() {
    let home = tempfile::tempdir().unwrap();
    let output = toolweave(home.path(), &["config", "default"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[orchestrator]"));
    assert!(stdout.contains("max_steps = 5"));
}

#[test]
fn config_validate_rejects_zero_steps() {
    let home = tempfile::tempdir().unwrap();
    let config = home.path().join("bad.toml");
    std::fs::write(&config, "[orchestrator]\nmax_steps = 0\n").unwrap();

    let output = toolweave(
        home.path(),
        &["--config", config.to_str().unwrap(), "config", "validate"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("max_steps"));
}
