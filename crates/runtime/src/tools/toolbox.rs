//! Toolbox trait.

use crate::tools::{ToolCall, ToolError, ToolSpec};
use serde_json::Value;
use std::future::Future;

/// Trait for tool execution backends.
///
/// Implementations provide tool specifications and execute tool calls.
/// This is the boundary between the agent loop and side effects.
pub trait Toolbox: Send {
    /// Get available tool specifications.
    fn specs(&self) -> &[ToolSpec];

    /// Whether a tool with this name is offered.
    fn offers(&self, name: &str) -> bool {
        self.specs().iter().any(|spec| spec.name == name)
    }

    /// Execute a tool call.
    fn execute(
        &mut self,
        call: &ToolCall,
    ) -> impl Future<Output = Result<Value, ToolError>> + Send;
}
