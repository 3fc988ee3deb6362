//! Error types for the toolweave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`RunError`] is what a
//! whole invocation is rejected with.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all toolweave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model invocation ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Argument validation ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // --- Schema declaration ---
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    // --- Whole-run failures ---
    #[error("Run failed: {0}")]
    Run(#[from] RunError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by the Model Invocation Interface.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    #[error("Model invocation aborted")]
    Aborted,
}

impl ModelError {
    /// Whether a fresh invocation may succeed where this one failed.
    ///
    /// Only consulted before any chunk of a response has been received.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::StreamInterrupted(_) | Self::InvalidResponse(_) | Self::Aborted => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool aborted: {tool_name}")]
    Aborted { tool_name: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool already registered: {0}")]
    DuplicateName(String),

    #[error("Invalid tool declaration: {tool_name}: {reason}")]
    InvalidDeclaration { tool_name: String, reason: String },
}

/// One failing field of a tool-call argument payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON pointer to the offending value (`""` for the root)
    pub path: String,

    /// The constraint that was not met
    pub constraint: String,
}

/// Every failing field of one argument payload, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("invalid tool arguments: {}", join_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn single(path: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            issues: vec![ValidationIssue {
                path: path.into(),
                constraint: constraint.into(),
            }],
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| {
            let path = if i.path.is_empty() { "/" } else { i.path.as_str() };
            format!("{path}: {}", i.constraint)
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("schema does not compile: {0}")]
    Compile(String),

    #[error("parameter schema root must be a JSON object, got {0}")]
    NotAnObject(String),
}

/// Why a whole invocation was rejected.
///
/// Step-local failures never end up here unless the tool error policy
/// says to propagate them.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("model invocation failed at step {step}: {source}")]
    ModelInvocation { step: usize, source: ModelError },

    #[error("tool '{tool_name}' ({tool_call_id}) failed at step {step}: {source}")]
    ToolExecution {
        step: usize,
        tool_call_id: String,
        tool_name: String,
        source: ToolError,
    },

    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("cannot resume run: {reason}")]
    InvalidResume { reason: String },
}

impl RunError {
    /// Taxonomy name, as written into terminal `error` frames.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelInvocation { .. } => "ModelInvocationError",
            Self::ToolExecution { .. } => "ToolExecutionError",
            Self::UnknownTool { .. } => "UnknownTool",
            Self::InvalidResume { .. } => "InvalidResume",
        }
    }

    /// The Step the failure belongs to, when there is one.
    pub fn step(&self) -> Option<usize> {
        match self {
            Self::ModelInvocation { step, .. } | Self::ToolExecution { step, .. } => Some(*step),
            Self::UnknownTool { .. } | Self::InvalidResume { .. } => None,
        }
    }
}
