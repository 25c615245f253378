//! MCP (Model Context Protocol) host and client, built on `rmcp`.
//!
//! Both halves of the round trip live here: a [`ToolHost`] serving a
//! [`ToolRegistry`] over stdio, TCP or streamable HTTP, and a client
//! [`Session`] that connects to one. Line-framed channels go through
//! [`LineTransport`], which answers malformed frames instead of hanging up.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{Endpoint, ServerConfig, Session};
//! use std::collections::HashMap;
//!
//! # async fn example() -> mcp::Result<()> {
//! let endpoint = Endpoint::Stdio(ServerConfig {
//!     name: "math".to_string(),
//!     command: "toolwire".to_string(),
//!     args: vec!["host".to_string(), "math".to_string()],
//!     env: HashMap::new(),
//! });
//!
//! let mut session = Session::connect(&endpoint).await?;
//! session.initialize().await?;
//!
//! for tool in session.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let args = serde_json::json!({"a": 3, "b": 5});
//! let result = session.call_tool("add", args.as_object().cloned()).await?;
//! println!("{result:?}");
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod host;
mod protocol;
mod registry;
mod transport;

pub use client::{Session, SessionState};
pub use error::{Error, Result};
pub use host::{HTTP_PATH, HttpHost, ServerIdentity, TcpHost, ToolHost};
pub use protocol::{
    Implementation, SUPPORTED_PROTOCOL_VERSIONS, ServerInfo, Tool, ToolCallResult, codes,
};
pub use registry::{
    Arguments, Param, ParamType, RegistryBuilder, RegistryError, ReturnType, ToolFailure,
    ToolHandler, ToolRegistry, ToolSpec,
};
pub use transport::{CONNECT_TIMEOUT, Endpoint, LineTransport, MAX_MESSAGE_SIZE, ServerConfig};
