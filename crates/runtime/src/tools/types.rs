//! Tool-related types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub input: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, input: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            input,
        }
    }
}

/// A tool definition exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl From<mcp::Tool> for ToolSpec {
    fn from(tool: mcp::Tool) -> Self {
        Self {
            name: tool.name.into_owned(),
            description: tool
                .description
                .map(|description| description.into_owned())
                .unwrap_or_default(),
            schema: Value::Object((*tool.input_schema).clone()),
        }
    }
}
