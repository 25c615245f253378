use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ToolError {
    /// The requested tool is not offered by this toolbox.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The tool ran and reported a failure.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The channel to the tool host broke.
    #[error("transport: {0}")]
    Transport(String),
}

impl From<mcp::Error> for ToolError {
    fn from(error: mcp::Error) -> Self {
        Self::Transport(error.to_string())
    }
}
