//! Tools: declarations, calls, results, and the name-keyed registry.
//!
//! A declaration pairs a parameter schema with an optional executor. A
//! declaration without an executor is a first-class thing: calls to it are
//! handed back to the caller unresolved (`Deferred`) instead of failing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::abort::AbortSignal;
use crate::error::{ToolError, ValidationError};
use crate::message::Message;
use crate::schema::{ParameterSchema, SchemaKind, parse_arguments};
use crate::side_channel::StreamData;

/// A request from the model to run a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Unique call ID within its Step (matches the model's tool call id)
    pub id: String,

    /// Name of the tool to execute
    pub tool_name: String,

    /// Arguments exactly as the model produced them
    pub raw_arguments: String,
}

impl ToolCall {
    /// Arguments as JSON; unparseable input is carried as a JSON string.
    pub fn args(&self) -> Value {
        parse_arguments(&self.raw_arguments)
            .unwrap_or_else(|_| Value::String(self.raw_arguments.clone()))
    }
}

/// Why an executor-level failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// No declaration with the requested name
    UnknownTool,
    /// The executor returned an error
    Failed,
    /// The executor gave up because the run was aborted
    Aborted,
}

/// The resolved outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ToolOutcome {
    Success { value: Value },
    ValidationFailed { error: ValidationError },
    ExecutionFailed { kind: FailureKind, error: String },
    Deferred,
}

impl ToolOutcome {
    pub fn success(value: Value) -> Self {
        Self::Success { value }
    }

    pub fn from_tool_error(error: &ToolError) -> Self {
        let kind = match error {
            ToolError::NotFound(_) => FailureKind::UnknownTool,
            ToolError::Aborted { .. } => FailureKind::Aborted,
            _ => FailureKind::Failed,
        };
        Self::ExecutionFailed {
            kind,
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred)
    }

    /// What the model sees in the tool message for this outcome.
    pub fn to_model_content(&self) -> String {
        match self {
            Self::Success {
                value: Value::String(s),
            } => s.clone(),
            Self::Success { value } => value.to_string(),
            Self::ValidationFailed { error } => format!("Error: {error}"),
            Self::ExecutionFailed { error, .. } => format!("Error: {error}"),
            Self::Deferred => String::new(),
        }
    }
}

/// The result of a tool call, correlated 1:1 with its [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// The call ID this result is for
    pub tool_call_id: String,

    /// The tool that was called
    pub tool_name: String,

    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn new(call: &ToolCall, outcome: ToolOutcome) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            outcome,
        }
    }
}

/// What the registry reports after dispatching one call.
///
/// Kept separate from "executor returned nothing": `Deferred` means no
/// executor exists, never that one ran.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Executed(Value),
    Deferred,
    Failed(ToolError),
}

impl From<ExecutionOutcome> for ToolOutcome {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Executed(value) => ToolOutcome::Success { value },
            ExecutionOutcome::Deferred => ToolOutcome::Deferred,
            ExecutionOutcome::Failed(e) => ToolOutcome::from_tool_error(&e),
        }
    }
}

/// Everything an executor may look at besides its arguments.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The call being executed
    pub tool_call_id: String,

    /// Index of the owning Step
    pub step: usize,

    /// History the Step's model invocation saw
    pub history: Arc<[Message]>,

    /// The run's cancellation token; long-running executors should watch it
    pub abort: AbortSignal,

    /// The run's side-channel
    pub data: StreamData,
}

/// Runs one tool call.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        (self.0)(arguments, ctx.clone()).await
    }
}

/// A self-describing tool (shell-style built-ins implement this).
pub trait Tool: ToolExecutor {
    /// The unique name of this tool (e.g., "weather_lookup").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;
}

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub parameters: Value,
}

/// A registered tool: schema plus optional executor.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub schema: ParameterSchema,
    pub executor: Option<Arc<dyn ToolExecutor>>,
}

impl ToolDefinition {
    /// A declaration with no executor; its calls are deferred to the caller.
    pub fn new(name: impl Into<String>, schema: ParameterSchema) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema,
            executor: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_executor(mut self, executor: impl ToolExecutor + 'static) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Use an async closure as the executor.
    pub fn with_executor_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.with_executor(FnExecutor(f))
    }

    pub fn has_executor(&self) -> bool {
        self.executor.is_some()
    }

    pub fn schema_kind(&self) -> SchemaKind {
        self.schema.kind()
    }

    pub fn to_declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.schema.json_schema().clone(),
        }
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .field("has_executor", &self.has_executor())
            .finish()
    }
}

/// A registry of available tools, keyed by unique name.
///
/// Stateless once built: the orchestrator shares it behind an `Arc` and
/// dispatches concurrent calls through `&self`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a declaration. Names are unique; schemas must describe an object.
    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), ToolError> {
        if self.tools.contains_key(&definition.name) {
            return Err(ToolError::DuplicateName(definition.name));
        }
        definition
            .schema
            .check_declaration()
            .map_err(|e| ToolError::InvalidDeclaration {
                tool_name: definition.name.clone(),
                reason: e.to_string(),
            })?;
        self.tools.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Register a self-describing tool, compiling its schema as structural.
    pub fn register_tool<T: Tool + 'static>(&mut self, tool: T) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        let schema = ParameterSchema::json(tool.parameters_schema()).map_err(|e| {
            ToolError::InvalidDeclaration {
                tool_name: name.clone(),
                reason: e.to_string(),
            }
        })?;
        let definition = ToolDefinition::new(name, schema)
            .with_description(tool.description())
            .with_executor(tool);
        self.register(definition)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Declaration-time check that every name refers to a registered tool.
    pub fn ensure_known<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ToolError> {
        match names.into_iter().find(|n| !self.contains(n)) {
            Some(unknown) => Err(ToolError::NotFound(unknown.to_string())),
            None => Ok(()),
        }
    }

    /// Declarations for the model, sorted by name so requests are stable.
    ///
    /// With `active` set, only the named tools are declared.
    pub fn declarations(&self, active: Option<&[String]>) -> Vec<ToolDeclaration> {
        let mut declarations: Vec<ToolDeclaration> = self
            .tools
            .values()
            .filter(|t| active.is_none_or(|names| names.iter().any(|n| n == &t.name)))
            .map(ToolDefinition::to_declaration)
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }

    /// Validate raw arguments against the named tool's schema.
    ///
    /// `None` when the tool is unknown.
    pub fn validate(
        &self,
        name: &str,
        raw_arguments: &str,
    ) -> Option<Result<Value, ValidationError>> {
        self.tools
            .get(name)
            .map(|t| t.schema.validate(raw_arguments))
    }

    /// Dispatch already-validated arguments to the named tool.
    pub async fn execute(&self, name: &str, arguments: Value, ctx: &ToolContext) -> ExecutionOutcome {
        let Some(definition) = self.tools.get(name) else {
            return ExecutionOutcome::Failed(ToolError::NotFound(name.to_string()));
        };
        match &definition.executor {
            None => ExecutionOutcome::Deferred,
            Some(executor) => match executor.execute(arguments, ctx).await {
                Ok(value) => ExecutionOutcome::Executed(value),
                Err(e) => ExecutionOutcome::Failed(e),
            },
        }
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
