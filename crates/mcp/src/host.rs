//! Tool host: serves a [`ToolRegistry`] to clients over stdio, TCP or
//! streamable HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParams, CallToolResult, ErrorData, Implementation, ListToolsResult,
    PaginatedRequestParams, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, ServerInitializeError};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::{StreamableHttpServerConfig, StreamableHttpService};
use rmcp::{RoleServer, ServerHandler, ServiceExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::registry::ToolRegistry;
use crate::transport::LineTransport;

/// Path the streamable HTTP endpoint is mounted on.
pub const HTTP_PATH: &str = "/mcp";

/// How a host introduces itself during the handshake.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
    /// Free-form usage hints for the client's agent.
    pub instructions: Option<String>,
}

impl ServerIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// The MCP server handler in front of a registry. One per session.
#[derive(Debug, Clone)]
struct RegistryHandler {
    identity: Arc<ServerIdentity>,
    registry: Arc<ToolRegistry>,
}

impl ServerHandler for RegistryHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.identity.name.clone(),
                version: self.identity.version.clone(),
                ..Implementation::default()
            },
            instructions: self.identity.instructions.clone(),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.registry.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        debug!(tool = %request.name, "Handling tool call");
        let outcome = self.registry.dispatch(&request.name, request.arguments).await;
        Ok(CallToolResult::from(outcome))
    }
}

/// Serves one registry. Cheap to clone; clones share the registry.
#[derive(Debug, Clone)]
pub struct ToolHost {
    handler: RegistryHandler,
}

impl ToolHost {
    pub fn new(identity: ServerIdentity, registry: Arc<ToolRegistry>) -> Self {
        Self {
            handler: RegistryHandler {
                identity: Arc::new(identity),
                registry,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.handler.identity.name
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.handler.registry
    }

    /// Serve a single session on this process' stdin/stdout until stdin closes.
    pub async fn serve_stdio(&self) -> Result<()> {
        info!(server = %self.name(), tools = self.registry().len(), "Serving on stdio");
        self.serve_connection(tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    /// Serve one session over the given streams. Returns when the peer closes
    /// the channel.
    pub async fn serve_connection<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let transport = LineTransport::<RoleServer>::new(reader, writer);
        let service = match self.handler.clone().serve(transport).await {
            Ok(service) => service,
            Err(ServerInitializeError::ConnectionClosed(_)) => {
                debug!(server = %self.name(), "Peer left before the handshake");
                return Ok(());
            }
            Err(e) => return Err(Error::Handshake(e.to_string())),
        };

        let client = service.peer_info().map(|info| info.client_info.name.clone());
        info!(server = %self.name(), ?client, "Client connected");
        match service.waiting().await {
            Ok(reason) => debug!(?client, ?reason, "Session ended"),
            Err(e) => warn!(?client, error = %e, "Session task failed"),
        }
        Ok(())
    }

    /// Bind a TCP listener. Every accepted connection is an independent session.
    pub async fn bind(self, addr: impl ToSocketAddrs) -> Result<TcpHost> {
        let listener = TcpListener::bind(addr).await?;
        Ok(TcpHost {
            host: self,
            listener,
        })
    }

    /// Bind an HTTP listener serving streamable HTTP on [`HTTP_PATH`].
    pub async fn bind_http(self, addr: impl ToSocketAddrs) -> Result<HttpHost> {
        let listener = TcpListener::bind(addr).await?;
        Ok(HttpHost {
            host: self,
            listener,
        })
    }

    /// Router with the streamable HTTP endpoint mounted on [`HTTP_PATH`].
    pub fn router(&self) -> axum::Router {
        let handler = self.handler.clone();
        let service = StreamableHttpService::new(
            move || Ok(handler.clone()),
            Arc::new(LocalSessionManager::default()),
            StreamableHttpServerConfig::default(),
        );
        axum::Router::new().nest_service(HTTP_PATH, service)
    }
}

/// A host bound to a TCP port.
pub struct TcpHost {
    host: ToolHost,
    listener: TcpListener,
}

impl TcpHost {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per session.
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!(server = %self.host.name(), %addr, "Serving on TCP");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            let host = self.host.clone();
            tokio::spawn(async move {
                info!(%peer, "Session opened");
                let (read_half, write_half) = stream.into_split();
                match host.serve_connection(read_half, write_half).await {
                    Ok(()) => info!(%peer, "Session closed"),
                    Err(e) => warn!(%peer, error = %e, "Session ended with error"),
                }
            });
        }
    }
}

/// A host bound to an HTTP port.
pub struct HttpHost {
    host: ToolHost,
    listener: TcpListener,
}

impl HttpHost {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the listener fails. Sessions are tracked per `Mcp-Session-Id`.
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!(server = %self.host.name(), %addr, path = HTTP_PATH, "Serving on HTTP");
        axum::serve(self.listener, self.host.router()).await?;
        Ok(())
    }
}
