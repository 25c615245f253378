//! Tool execution seam between the agent loop and tool hosts.

pub mod errors;
mod local;
mod mcp_toolbox;
mod toolbox;
mod types;

pub use errors::ToolError;
pub use local::LocalToolbox;
pub use mcp_toolbox::McpToolbox;
pub use toolbox::Toolbox;
pub use types::{ToolCall, ToolSpec};
