//! `ask_user`: a declaration without an executor.
//!
//! The model may call it like any other tool, but the orchestrator has
//! nothing to run: the call is deferred to the caller, who answers it and
//! resumes the run.

use serde_json::json;

use toolweave_core::{ParameterSchema, ToolDefinition};

pub const NAME: &str = "ask_user";

pub fn definition() -> ToolDefinition {
    ToolDefinition::new(
        NAME,
        ParameterSchema::declarative(json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "What to ask the user"
                }
            },
            "required": ["question"]
        })),
    )
    .with_description("Ask the user a question and wait for the answer.")
}
