//! Client side of a session with a tool host.

use std::time::Duration;

use rmcp::model::{
    CallToolRequestParams, ClientCapabilities, ClientInfo, ClientRequest, ErrorData,
    Implementation, PingRequest, ProtocolVersion, ServerInfo, Tool,
};
use rmcp::service::{ClientInitializeError, RoleClient, RunningService};
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{ServiceError, ServiceExt};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{ToolCallResult, codes, is_supported};
use crate::transport::{CONNECT_TIMEOUT, Endpoint, LineTransport, RemoteUrl, parse_remote_url};

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel open, handshake not yet done.
    Connected,
    /// Handshake complete; tool calls accepted.
    Ready,
    /// Closed by the caller or broken by a transport failure.
    Closed,
}

/// A channel that has not been through the handshake yet.
enum Pending {
    Child(TokioChildProcess),
    Lines(LineTransport<RoleClient>),
    /// Streamable HTTP opens its connection during the handshake.
    Http(String),
}

type Service = RunningService<RoleClient, ClientInfo>;

/// One live channel to one host.
///
/// Every operation takes `&mut self`, so a session carries one request at a
/// time. Requests have no deadline unless one is set with
/// [`Session::with_timeout`].
pub struct Session {
    pending: Option<Pending>,
    service: Option<Service>,
    state: SessionState,
    timeout: Option<Duration>,
    process_id: Option<u32>,
    peer: String,
}

impl Session {
    /// Open a channel to the endpoint. The session still needs [`Session::initialize`].
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Stdio(config) => {
                let child = TokioChildProcess::new(Command::new(&config.command).configure(|cmd| {
                    cmd.args(&config.args).envs(&config.env);
                }))?;
                let process_id = child.id();
                debug!(server = %config.name, command = %config.command, pid = ?process_id, "Spawned tool host");

                let mut session = Self::with_pending(Pending::Child(child), &config.name);
                session.process_id = process_id;
                Ok(session)
            }
            Endpoint::Remote { name, url } => match parse_remote_url(url)? {
                RemoteUrl::Tcp(addr) => {
                    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
                        .await
                        .map_err(|_| Error::Timeout)??;
                    stream.set_nodelay(true)?;
                    debug!(%addr, "Connected to tool host");

                    let (read_half, write_half) = stream.into_split();
                    let transport = LineTransport::new(read_half, write_half).with_peer(addr);
                    Ok(Self::with_pending(Pending::Lines(transport), name))
                }
                RemoteUrl::Http(url) => Ok(Self::with_pending(Pending::Http(url), name)),
            },
        }
    }

    /// A session over an arbitrary pair of line-framed streams.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_pending(Pending::Lines(LineTransport::new(reader, writer)), "io")
    }

    fn with_pending(pending: Pending, peer: &str) -> Self {
        Self {
            pending: Some(pending),
            service: None,
            state: SessionState::Connected,
            timeout: None,
            process_id: None,
            peer: peer.to_string(),
        }
    }

    /// Bound every request after the handshake. `None` (the default) waits
    /// as long as the host takes.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// OS process id of a spawned host.
    pub fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    /// Handshake result (after initialization).
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.service.as_ref().and_then(|service| service.peer_info())
    }

    /// Perform the capability handshake. Must precede any tool operation.
    pub async fn initialize(&mut self) -> Result<&ServerInfo> {
        match self.state {
            SessionState::Connected => {}
            SessionState::Ready => {
                return Err(Error::ProtocolViolation(
                    "session already initialized".into(),
                ));
            }
            SessionState::Closed => return Err(Error::ChannelClosed),
        }
        let pending = self.pending.take().ok_or(Error::ChannelClosed)?;
        // Until the handshake succeeds the session is unusable.
        self.state = SessionState::Closed;

        let info = client_info();
        let handshake = async move {
            match pending {
                Pending::Child(transport) => info.serve(transport).await,
                Pending::Lines(transport) => info.serve(transport).await,
                Pending::Http(url) => {
                    info.serve(StreamableHttpClientTransport::from_uri(url)).await
                }
            }
        };
        let service = match timeout(CONNECT_TIMEOUT, handshake).await {
            Ok(Ok(service)) => service,
            Ok(Err(e)) => return Err(handshake_error(e)),
            Err(_) => return Err(Error::Timeout),
        };

        let Some(server) = service.peer_info() else {
            let _ = service.cancel().await;
            return Err(Error::Handshake("no initialize result".into()));
        };
        if !is_supported(&server.protocol_version) {
            let version = server.protocol_version.to_string();
            let _ = service.cancel().await;
            return Err(Error::UnsupportedProtocolVersion(version));
        }
        info!(
            server = %server.server_info.name,
            protocol = %server.protocol_version,
            "Session initialized"
        );

        self.state = SessionState::Ready;
        let service = self.service.insert(service);
        service
            .peer_info()
            .ok_or_else(|| Error::Handshake("no initialize result".into()))
    }

    /// Enumerate the host's tools.
    pub async fn list_tools(&mut self) -> Result<Vec<Tool>> {
        self.ensure_ready("tools/list")?;
        let service = self.service.as_ref().ok_or(Error::ChannelClosed)?;
        let result = with_deadline(self.timeout, service.list_all_tools()).await;
        self.settle("tools/list", result)
    }

    /// Call a tool by name and wait for its outcome.
    ///
    /// Tool-level failures (unknown tool, bad arguments, the tool's own error)
    /// come back as [`ToolCallResult::Err`]; channel and protocol problems
    /// are `Err`.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<ToolCallResult> {
        self.ensure_ready("tools/call")?;
        let service = self.service.as_ref().ok_or(Error::ChannelClosed)?;

        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments,
            meta: None,
            task: None,
        };
        let result = with_deadline(self.timeout, service.call_tool(params)).await;

        match result {
            Ok(result) => Ok(ToolCallResult::from(result)),
            // Some hosts report argument problems as JSON-RPC errors.
            Err(ServiceError::McpError(error)) if error.code == codes::INVALID_PARAMS => {
                Ok(ToolCallResult::Err(error.message.into_owned()))
            }
            Err(e) => self.settle("tools/call", Err(e)),
        }
    }

    /// Liveness check.
    pub async fn ping(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::ChannelClosed);
        }
        let service = self
            .service
            .as_ref()
            .ok_or_else(|| Error::ProtocolViolation("ping called before initialize".into()))?;
        let request = ClientRequest::PingRequest(PingRequest::default());
        let result = with_deadline(self.timeout, service.send_request(request)).await;
        self.settle("ping", result).map(|_| ())
    }

    /// Close the channel and reap a spawned host. Safe to call on a broken session.
    pub async fn close(mut self) -> Result<()> {
        self.state = SessionState::Closed;
        if let Some(service) = self.service.take() {
            match service.cancel().await {
                Ok(reason) => debug!(peer = %self.peer, ?reason, "Session closed"),
                Err(e) => warn!(peer = %self.peer, error = %e, "Session task failed"),
            }
        }
        // A never-initialized child is killed when its transport drops.
        drop(self.pending.take());
        Ok(())
    }

    // --- Internal methods ---

    fn ensure_ready(&self, method: &str) -> Result<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Connected => Err(Error::ProtocolViolation(format!(
                "{method} called before initialize"
            ))),
            SessionState::Closed => Err(Error::ChannelClosed),
        }
    }

    /// Map a service outcome to ours. Channel failures close the session.
    fn settle<T>(&mut self, method: &str, result: std::result::Result<T, ServiceError>) -> Result<T> {
        let error = match result {
            Ok(value) => return Ok(value),
            Err(e) => map_service_error(e),
        };
        if error.is_transport() {
            warn!(peer = %self.peer, %method, error = %error, "Transport failed, closing session");
            self.state = SessionState::Closed;
            // Dropping the service cancels it, which also stops a spawned host.
            self.service = None;
        }
        Err(error)
    }
}

fn client_info() -> ClientInfo {
    ClientInfo {
        meta: None,
        protocol_version: ProtocolVersion::LATEST,
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "toolwire".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Implementation::default()
        },
    }
}

async fn with_deadline<T>(
    limit: Option<Duration>,
    request: impl Future<Output = std::result::Result<T, ServiceError>>,
) -> std::result::Result<T, ServiceError> {
    match limit {
        Some(limit) => timeout(limit, request)
            .await
            .unwrap_or(Err(ServiceError::Timeout { timeout: limit })),
        None => request.await,
    }
}

fn map_service_error(error: ServiceError) -> Error {
    match error {
        ServiceError::McpError(error) => map_rpc_error(error),
        ServiceError::TransportSend(e) => Error::Transport(std::io::Error::other(e.to_string())),
        ServiceError::TransportClosed | ServiceError::Cancelled { .. } => Error::ChannelClosed,
        ServiceError::Timeout { .. } => Error::Timeout,
        ServiceError::UnexpectedResponse => {
            Error::InvalidResponse("unexpected response type".into())
        }
        other => Error::InvalidResponse(other.to_string()),
    }
}

fn map_rpc_error(error: ErrorData) -> Error {
    if error.code == codes::NOT_INITIALIZED {
        Error::ProtocolViolation(error.message.into_owned())
    } else {
        Error::Rpc(error)
    }
}

fn handshake_error(error: ClientInitializeError) -> Error {
    match error {
        ClientInitializeError::ConnectionClosed(_) => Error::ChannelClosed,
        ClientInitializeError::JsonRpcError(error) => map_rpc_error(error),
        other => Error::Handshake(other.to_string()),
    }
}
