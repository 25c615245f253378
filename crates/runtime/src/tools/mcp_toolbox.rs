//! Toolbox backed by a session with a tool host.

use std::time::Duration;

use mcp::{Endpoint, Session, ToolCallResult};
use serde_json::Value;
use tracing::debug;

use crate::tools::{ToolCall, ToolError, ToolSpec, Toolbox};

/// Tools discovered on one host, called over one [`Session`].
pub struct McpToolbox {
    session: Session,
    specs: Vec<ToolSpec>,
    instructions: Option<String>,
}

impl McpToolbox {
    /// Connect, handshake and discover the host's tools. `request_timeout`
    /// bounds each request after the handshake.
    pub async fn connect(
        endpoint: &Endpoint,
        request_timeout: Option<Duration>,
    ) -> mcp::Result<Self> {
        let session = Session::connect(endpoint)
            .await?
            .with_timeout(request_timeout);
        Self::from_session(session).await
    }

    /// Wrap a fresh session. Performs the handshake if it has not happened yet.
    pub async fn from_session(mut session: Session) -> mcp::Result<Self> {
        if session.state() == mcp::SessionState::Connected {
            session.initialize().await?;
        }
        let instructions = session
            .server_info()
            .and_then(|info| info.instructions.clone());
        let specs: Vec<ToolSpec> = session
            .list_tools()
            .await?
            .into_iter()
            .map(ToolSpec::from)
            .collect();
        debug!(tools = specs.len(), "Discovered tools");

        Ok(Self {
            session,
            specs,
            instructions,
        })
    }

    /// Usage hints the host sent during the handshake.
    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    /// Release the session.
    pub async fn close(self) -> mcp::Result<()> {
        self.session.close().await
    }
}

impl Toolbox for McpToolbox {
    fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    async fn execute(&mut self, call: &ToolCall) -> Result<Value, ToolError> {
        let outcome = self
            .session
            .call_tool(&call.name, Some(call.input.clone()))
            .await?;

        match outcome {
            ToolCallResult::Ok(value) => Ok(value),
            ToolCallResult::Err(message) => Err(ToolError::Execution(message)),
        }
    }
}
