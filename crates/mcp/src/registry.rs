//! Tool registry: an immutable table from tool name to schema and handler.
//!
//! Built once at host startup with [`ToolRegistry::builder`]. Dispatch never
//! fails: every problem (unknown name, bad arguments, a failing or panicking
//! handler) comes back as a [`ToolCallResult::Err`] value.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::protocol::{JsonObject, Tool, ToolCallResult};

/// Error raised by a tool's own implementation.
pub type ToolFailure = Box<dyn std::error::Error + Send + Sync>;

/// Primitive type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Integer,
    Number,
    String,
    Boolean,
}

impl ParamType {
    /// JSON Schema type name.
    pub fn json_type(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
        }
    }

    /// Integers must be whole JSON numbers that fit in an `i64`.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Integer => value.as_i64().is_some(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// Declared result type of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    Integer,
    Number,
    String,
    Boolean,
    /// Structured output of any shape.
    Json,
}

impl ReturnType {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Integer => ParamType::Integer.accepts(value),
            Self::Number => ParamType::Number.accepts(value),
            Self::String => ParamType::String.accepts(value),
            Self::Boolean => ParamType::Boolean.accepts(value),
            Self::Json => true,
        }
    }
}

/// One named, typed parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Signature and description of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<Param>,
    pub returns: ReturnType,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            returns: ReturnType::String,
        }
    }

    /// Append a parameter. Declaration order is preserved.
    pub fn param(mut self, name: impl Into<String>, ty: ParamType, description: &str) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty,
            description: (!description.is_empty()).then(|| description.to_string()),
        });
        self
    }

    pub fn returns(mut self, returns: ReturnType) -> Self {
        self.returns = returns;
        self
    }

    /// JSON Schema for the arguments object. `required` lists every parameter
    /// in declaration order.
    pub fn input_schema(&self) -> JsonObject {
        let mut properties = Map::new();
        for param in &self.params {
            let mut property = json!({ "type": param.ty.json_type() });
            if let Some(description) = &param.description {
                property["description"] = Value::String(description.clone());
            }
            properties.insert(param.name.clone(), property);
        }
        let required: Vec<&str> = self.params.iter().map(|p| p.name.as_str()).collect();

        let mut schema = JsonObject::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(properties));
        schema.insert("required".into(), json!(required));
        schema
    }

    /// Wire descriptor for tools/list.
    pub fn to_tool(&self) -> Tool {
        Tool::new(
            self.name.clone(),
            self.description.clone(),
            Arc::new(self.input_schema()),
        )
    }

    /// Check argument count and types. The error is a human-readable detail.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), String> {
        for param in &self.params {
            match args.get(&param.name) {
                None => return Err(format!("missing argument `{}`", param.name)),
                Some(value) if !param.ty.accepts(value) => {
                    return Err(format!(
                        "argument `{}` must be {}, got {value}",
                        param.name,
                        param.ty.json_type()
                    ));
                }
                Some(_) => {}
            }
        }

        if let Some(extra) = args
            .keys()
            .find(|key| !self.params.iter().any(|p| &p.name == *key))
        {
            return Err(format!("unexpected argument `{extra}`"));
        }

        Ok(())
    }
}

/// Validated arguments handed to a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn integer(&self, name: &str) -> Result<i64, ToolFailure> {
        self.get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| missing(name, "integer"))
    }

    pub fn number(&self, name: &str) -> Result<f64, ToolFailure> {
        self.get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| missing(name, "number"))
    }

    pub fn string(&self, name: &str) -> Result<&str, ToolFailure> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| missing(name, "string"))
    }

    pub fn boolean(&self, name: &str) -> Result<bool, ToolFailure> {
        self.get(name)
            .and_then(Value::as_bool)
            .ok_or_else(|| missing(name, "boolean"))
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

fn missing(name: &str, ty: &str) -> ToolFailure {
    format!("expected {ty} argument `{name}`").into()
}

/// The function behind a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Arguments) -> Result<Value, ToolFailure>;
}

/// Adapter for plain synchronous functions.
struct FnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(&Arguments) -> Result<Value, ToolFailure> + Send + Sync,
{
    async fn call(&self, args: Arguments) -> Result<Value, ToolFailure> {
        (self.0)(&args)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate tool name: {0}")]
    Duplicate(String),

    #[error("tool name must not be empty")]
    EmptyName,
}

struct Entry {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

/// Collects tools before freezing them into a [`ToolRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<Entry>,
}

impl RegistryBuilder {
    /// Register a tool backed by a handler.
    pub fn tool(mut self, spec: ToolSpec, handler: impl ToolHandler + 'static) -> Self {
        self.entries.push(Entry {
            spec,
            handler: Arc::new(handler),
        });
        self
    }

    /// Register a tool backed by a synchronous function.
    pub fn function<F>(self, spec: ToolSpec, f: F) -> Self
    where
        F: Fn(&Arguments) -> Result<Value, ToolFailure> + Send + Sync + 'static,
    {
        self.tool(spec, FnHandler(f))
    }

    /// Merge another builder's tools after this one's.
    pub fn merge(mut self, other: RegistryBuilder) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        let mut index = HashMap::with_capacity(self.entries.len());
        for (position, entry) in self.entries.iter().enumerate() {
            if entry.spec.name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if index.insert(entry.spec.name.clone(), position).is_some() {
                return Err(RegistryError::Duplicate(entry.spec.name.clone()));
            }
        }
        Ok(ToolRegistry {
            entries: self.entries,
            index,
        })
    }
}

/// Immutable mapping from tool name to schema and handler.
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.spec.name.as_str())
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&i| &self.entries[i].spec)
    }

    /// All specs, in registration order.
    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.entries.iter().map(|e| &e.spec)
    }

    /// Wire descriptors for tools/list, in registration order.
    pub fn tools(&self) -> Vec<Tool> {
        self.specs().map(ToolSpec::to_tool).collect()
    }

    /// Execute one tool call.
    pub async fn dispatch(&self, name: &str, arguments: Option<Map<String, Value>>) -> ToolCallResult {
        let Some(&position) = self.index.get(name) else {
            warn!(tool = %name, "Unknown tool requested");
            return ToolCallResult::Err(format!("unknown tool: {name}"));
        };
        let entry = &self.entries[position];

        let args = arguments.unwrap_or_default();
        if let Err(detail) = entry.spec.validate(&args) {
            warn!(tool = %name, %detail, "Rejected tool call");
            return ToolCallResult::Err("invalid arguments".to_string());
        }

        // Run on a separate task so a panicking tool cannot take the host down.
        let handler = Arc::clone(&entry.handler);
        let args = Arguments::new(args);
        let task = tokio::spawn(async move { handler.call(args).await });

        match task.await {
            Ok(Ok(value)) if entry.spec.returns.accepts(&value) => {
                debug!(tool = %name, "Tool call succeeded");
                ToolCallResult::Ok(value)
            }
            Ok(Ok(value)) => {
                error!(tool = %name, returns = ?entry.spec.returns, %value, "Tool returned a value of the wrong type");
                ToolCallResult::Err("tool returned an unexpected type".to_string())
            }
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Tool call failed");
                ToolCallResult::Err(e.to_string())
            }
            Err(join) if join.is_panic() => {
                let message = panic_message(join.into_panic());
                error!(tool = %name, %message, "Tool panicked");
                ToolCallResult::Err(format!("tool panicked: {message}"))
            }
            Err(_) => ToolCallResult::Err("tool call was cancelled".to_string()),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
