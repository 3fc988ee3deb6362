//! Schema validation for tool-call arguments.
//!
//! Two capability variants exist:
//! - **Structural** schemas can check (and normalize) a payload at runtime.
//!   [`JsonSchema`] compiles a JSON Schema document; [`TypedSchema`] adds a
//!   serde parse into a Rust type on top of it.
//! - **Declarative** schemas are only descriptors. Arguments pass through
//!   untouched and checking is left to the model provider's contract.
//!
//! Validation is pure: no I/O, no shared state.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{SchemaError, ValidationError, ValidationIssue};

/// A schema that can check arguments at runtime.
pub trait StructuralSchema: Send + Sync {
    /// The JSON Schema rendering sent to the model as tool parameters.
    fn json_schema(&self) -> &Value;

    /// Check `arguments`, returning the typed (possibly normalized) payload.
    fn validate(&self, arguments: &Value) -> Result<Value, ValidationError>;
}

/// A compiled JSON Schema document.
pub struct JsonSchema {
    schema: Value,
    compiled: jsonschema::JSONSchema,
}

impl JsonSchema {
    /// Compile `schema`. Failing here keeps a malformed declaration out of any run.
    pub fn compile(schema: Value) -> Result<Self, SchemaError> {
        let compiled = jsonschema::JSONSchema::compile(&schema)
            .map_err(|e| SchemaError::Compile(e.to_string()))?;
        Ok(Self { schema, compiled })
    }
}

impl fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl StructuralSchema for JsonSchema {
    fn json_schema(&self) -> &Value {
        &self.schema
    }

    fn validate(&self, arguments: &Value) -> Result<Value, ValidationError> {
        match self.compiled.validate(arguments) {
            Ok(()) => Ok(arguments.clone()),
            Err(errors) => Err(ValidationError {
                issues: errors
                    .map(|e| ValidationIssue {
                        path: e.instance_path.to_string(),
                        constraint: e.to_string(),
                    })
                    .collect(),
            }),
        }
    }
}

/// A JSON Schema plus a serde parse into `T`.
///
/// Every schema violation is reported first; only a payload that passes
/// the schema is parsed, and the parsed value is re-serialized so that
/// serde defaults show up in the typed arguments.
pub struct TypedSchema<T> {
    json: JsonSchema,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T>
where
    T: DeserializeOwned + Serialize,
{
    pub fn new(schema: Value) -> Result<Self, SchemaError> {
        Ok(Self {
            json: JsonSchema::compile(schema)?,
            _marker: PhantomData,
        })
    }
}

impl<T> StructuralSchema for TypedSchema<T>
where
    T: DeserializeOwned + Serialize,
{
    fn json_schema(&self) -> &Value {
        self.json.json_schema()
    }

    fn validate(&self, arguments: &Value) -> Result<Value, ValidationError> {
        let checked = self.json.validate(arguments)?;
        let typed: T = serde_json::from_value(checked)
            .map_err(|e| ValidationError::single("", e.to_string()))?;
        serde_json::to_value(typed).map_err(|e| ValidationError::single("", e.to_string()))
    }
}

/// Which capability a declared schema has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Structural,
    Declarative,
}

/// The parameter schema of a tool declaration.
#[derive(Clone)]
pub enum ParameterSchema {
    Structural(Arc<dyn StructuralSchema>),
    Declarative(Value),
}

impl ParameterSchema {
    /// Compile a JSON Schema document into a structural schema.
    pub fn json(schema: Value) -> Result<Self, SchemaError> {
        Ok(Self::Structural(Arc::new(JsonSchema::compile(schema)?)))
    }

    /// A structural schema that also parses into `T`.
    pub fn typed<T>(schema: Value) -> Result<Self, SchemaError>
    where
        T: DeserializeOwned + Serialize + 'static,
    {
        Ok(Self::Structural(Arc::new(TypedSchema::<T>::new(schema)?)))
    }

    /// A descriptor only; arguments are forwarded as-is.
    pub fn declarative(schema: Value) -> Self {
        Self::Declarative(schema)
    }

    pub fn kind(&self) -> SchemaKind {
        match self {
            Self::Structural(_) => SchemaKind::Structural,
            Self::Declarative(_) => SchemaKind::Declarative,
        }
    }

    /// The JSON Schema sent to the model.
    pub fn json_schema(&self) -> &Value {
        match self {
            Self::Structural(schema) => schema.json_schema(),
            Self::Declarative(schema) => schema,
        }
    }

    /// Declaration-time shape check: the root must describe an object.
    pub fn check_declaration(&self) -> Result<(), SchemaError> {
        match self.json_schema() {
            Value::Object(_) => Ok(()),
            other => Err(SchemaError::NotAnObject(type_name(other).into())),
        }
    }

    /// Validate raw model output against this schema.
    pub fn validate(&self, raw_arguments: &str) -> Result<Value, ValidationError> {
        validate(self, raw_arguments)
    }
}

impl fmt::Debug for ParameterSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structural(schema) => f
                .debug_tuple("Structural")
                .field(schema.json_schema())
                .finish(),
            Self::Declarative(schema) => f.debug_tuple("Declarative").field(schema).finish(),
        }
    }
}

/// Parse raw tool-call arguments.
///
/// An empty string stands for "no arguments" and parses as `{}`.
pub fn parse_arguments(raw_arguments: &str) -> Result<Value, ValidationError> {
    if raw_arguments.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(raw_arguments)
        .map_err(|e| ValidationError::single("", format!("expected valid JSON ({e})")))
}

/// Validate `raw_arguments` against `schema`.
pub fn validate(schema: &ParameterSchema, raw_arguments: &str) -> Result<Value, ValidationError> {
    let arguments = parse_arguments(raw_arguments)?;
    match schema {
        ParameterSchema::Structural(structural) => structural.validate(&arguments),
        ParameterSchema::Declarative(_) => Ok(arguments),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
