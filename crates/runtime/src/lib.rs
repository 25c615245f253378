//! Toolwire runtime: model backends, retry, tool access and the agent loop.
//!
//! # Overview
//!
//! - **Backend**: a trait abstracting LLM providers (watsonx.ai).
//! - **Retry**: bounded immediate retry, composed over any backend with
//!   [`RetryingBackend`].
//! - **Toolbox**: the seam between the agent and tools, either over an MCP
//!   session ([`McpToolbox`]) or an in-process registry ([`LocalToolbox`]).
//! - **Agent**: the plan/act/observe loop with a step budget.
//!
//! # Example
//!
//! ```ignore
//! use mcp::Endpoint;
//! use runtime::{Agent, AgentConfig, McpToolbox, Retry, RetryingBackend, WatsonxBackend};
//!
//! # async fn example(endpoint: Endpoint) -> runtime::Result<()> {
//! let backend = WatsonxBackend::builder()
//!     .url("https://us-south.ml.cloud.ibm.com")
//!     .api_key("...")
//!     .project_id("...")
//!     .build();
//! let agent = Agent::new(RetryingBackend::new(backend, Retry::default()), AgentConfig::default());
//!
//! let mut toolbox = McpToolbox::connect(&endpoint, None).await?;
//! let outcome = agent.run(&mut toolbox, "what's (3 + 5) x 12?").await;
//! toolbox.close().await?;
//! println!("{}", outcome?.answer);
//! # Ok(())
//! # }
//! ```

mod agent;
mod error;
pub mod model;
pub mod prompt;
mod providers;
mod retry;
pub mod tools;

pub use agent::{Agent, AgentConfig, AgentOutcome};
pub use error::{Error, Result};
pub use model::{Backend, Message, ModelError, ModelRequest, ModelResponse, Role, Usage};
pub use providers::{
    DEFAULT_IAM_URL, DEFAULT_MODEL, Decoding, GenerationParams, WatsonxBackend,
    WatsonxBackendBuilder,
};
pub use retry::{Retry, RetryPolicy, RetryingBackend, Transient};
pub use tools::{LocalToolbox, McpToolbox, ToolCall, ToolError, ToolSpec, Toolbox};
