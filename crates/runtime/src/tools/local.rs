//! In-process toolbox over a registry.

use std::sync::Arc;

use mcp::{ToolCallResult, ToolRegistry};
use serde_json::Value;

use crate::tools::{ToolCall, ToolError, ToolSpec, Toolbox};

/// Calls registry tools directly, without a transport.
pub struct LocalToolbox {
    registry: Arc<ToolRegistry>,
    specs: Vec<ToolSpec>,
}

impl LocalToolbox {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        let specs = registry.tools().into_iter().map(ToolSpec::from).collect();
        Self { registry, specs }
    }
}

impl Toolbox for LocalToolbox {
    fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    async fn execute(&mut self, call: &ToolCall) -> Result<Value, ToolError> {
        if self.registry.spec(&call.name).is_none() {
            return Err(ToolError::NotFound(call.name.clone()));
        }
        match self
            .registry
            .dispatch(&call.name, Some(call.input.clone()))
            .await
        {
            ToolCallResult::Ok(value) => Ok(value),
            ToolCallResult::Err(message) => Err(ToolError::Execution(message)),
        }
    }
}
