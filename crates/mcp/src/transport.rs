//! Transports: how a session reaches its peer.
//!
//! A host is either spawned as a child process (its stdin/stdout), reached over
//! a TCP connection carrying one JSON message per line, or reached over
//! streamable HTTP. [`LineTransport`] does the line framing for stdio and TCP
//! and keeps a session alive across frames it cannot decode.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{ErrorCode, ProtocolVersion};
use rmcp::service::{RxJsonRpcMessage, ServiceRole, TxJsonRpcMessage};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{SUPPORTED_PROTOCOL_VERSIONS, code_name, codes};

/// Maximum size of a single frame (1MB), not counting the line terminator.
/// Sized for large tool outputs (search results, retrieved documents).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Upper bound on establishing a connection, handshake included.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a host launched as a child process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Where a tool host lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum Endpoint {
    /// Spawn the host and talk over its stdin/stdout.
    Stdio(ServerConfig),
    /// Connect to a listening host. `tcp://host:port` (or a bare `host:port`)
    /// is line-framed TCP; `http://` and `https://` are streamable HTTP.
    #[serde(alias = "tcp", alias = "http", alias = "sse")]
    Remote { name: String, url: String },
}

impl Endpoint {
    pub fn name(&self) -> &str {
        match self {
            Self::Stdio(config) => &config.name,
            Self::Remote { name, .. } => name,
        }
    }
}

/// A parsed remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RemoteUrl {
    /// `host:port` for a line-framed TCP connection.
    Tcp(String),
    /// Full URL of a streamable HTTP endpoint.
    Http(String),
}

pub(crate) fn parse_remote_url(url: &str) -> Result<RemoteUrl> {
    let addr = match url.split_once("://") {
        Some(("http" | "https", rest)) if !rest.is_empty() => {
            return Ok(RemoteUrl::Http(url.to_string()));
        }
        Some(("tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(Error::InvalidEndpoint(format!(
                "unsupported scheme '{scheme}' in {url}"
            )));
        }
        None => url,
    };
    let addr = addr.trim_end_matches('/');

    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(RemoteUrl::Tcp(addr.to_string()))
        }
        _ => Err(Error::InvalidEndpoint(format!("expected host:port, got {url}"))),
    }
}

/// One unit read off a line-framed stream.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    /// A non-blank line, terminator removed. Not necessarily UTF-8.
    Line(Vec<u8>),
    /// A line longer than [`MAX_MESSAGE_SIZE`]; its bytes were discarded.
    TooLarge(usize),
    Eof,
}

/// Read the next non-blank line. An oversized line is skipped up to and
/// including its newline, so the stream stays in sync.
pub(crate) async fn read_frame<R>(reader: &mut R) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = Vec::new();
        let mut size = 0usize;
        let mut overflow = false;

        loop {
            let (used, done) = {
                let available = reader.fill_buf().await?;
                if available.is_empty() {
                    break;
                }
                let (used, done) = match available.iter().position(|&b| b == b'\n') {
                    Some(i) => (i + 1, true),
                    None => (available.len(), false),
                };
                // Room for the payload plus a `\r\n` terminator.
                if !overflow && line.len() + used <= MAX_MESSAGE_SIZE + 2 {
                    line.extend_from_slice(&available[..used]);
                } else {
                    overflow = true;
                    line.clear();
                }
                (used, done)
            };
            reader.consume(used);
            size += used;
            if done {
                break;
            }
        }

        if size == 0 {
            return Ok(Frame::Eof);
        }
        if overflow {
            return Ok(Frame::TooLarge(size));
        }

        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.len() > MAX_MESSAGE_SIZE {
            return Ok(Frame::TooLarge(line.len()));
        }
        if !line.iter().all(u8::is_ascii_whitespace) {
            return Ok(Frame::Line(line));
        }
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Where the serving side is in the MCP handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    AwaitInitialize,
    AwaitInitialized,
    Done,
}

/// What to do with a decoded message before the session sees it.
enum Admit {
    Pass,
    Drop,
    Reply(Value),
}

impl Handshake {
    /// Requests other than `initialize` and `ping` wait for the handshake.
    fn admit(&mut self, message: &Value) -> Admit {
        let method = message.get("method").and_then(Value::as_str);
        let id = message.get("id").filter(|id| !id.is_null()).cloned();

        match (method, id) {
            (None, _) if *self == Self::Done => Admit::Pass,
            (None, _) => Admit::Drop,
            (Some("initialize"), Some(_)) if *self == Self::AwaitInitialize => {
                *self = Self::AwaitInitialized;
                Admit::Pass
            }
            (Some("initialize"), Some(id)) => Admit::Reply(error_reply(
                id,
                codes::INVALID_REQUEST,
                "session already initialized",
            )),
            (Some("ping"), Some(id)) if *self != Self::Done => {
                Admit::Reply(json!({"jsonrpc": "2.0", "id": id, "result": {}}))
            }
            (Some(_), Some(id)) if *self != Self::Done => {
                Admit::Reply(error_reply(id, codes::NOT_INITIALIZED, "server not initialized"))
            }
            (Some(_), Some(_)) => Admit::Pass,
            (Some("notifications/initialized"), None) if *self == Self::AwaitInitialized => {
                *self = Self::Done;
                Admit::Pass
            }
            (Some(method), None) if *self != Self::Done => {
                debug!(%method, "Dropping notification received before the handshake");
                Admit::Drop
            }
            (Some(_), None) => Admit::Pass,
        }
    }
}

/// An `initialize` asking for a revision we do not speak is answered with
/// the latest one we do.
fn pin_supported_version(message: &mut Value) {
    if message.get("method").and_then(Value::as_str) != Some("initialize") {
        return;
    }
    if let Some(version) = message.pointer_mut("/params/protocolVersion")
        && let Some(requested) = version.as_str()
        && !SUPPORTED_PROTOCOL_VERSIONS
            .iter()
            .any(|supported| supported.to_string() == requested)
    {
        debug!(%requested, "Unknown protocol version requested");
        *version = Value::String(ProtocolVersion::LATEST.to_string());
    }
}

fn error_reply(id: Value, code: ErrorCode, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code.0, "message": message.into()},
    })
}

/// Line-framed JSON-RPC over any pair of byte streams.
///
/// Frames that are not UTF-8, not JSON, or too large are answered with a
/// JSON-RPC error (id `null` when none can be read) and the session keeps
/// reading. On the serving side the transport also enforces handshake order.
pub struct LineTransport<R> {
    reader: BufReader<BoxedReader>,
    writer: Arc<Mutex<BoxedWriter>>,
    handshake: Handshake,
    peer: String,
    _role: PhantomData<fn() -> R>,
}

impl<R: ServiceRole> LineTransport<R> {
    pub fn new<Rd, W>(reader: Rd, writer: W) -> Self
    where
        Rd: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader)),
            writer: Arc::new(Mutex::new(Box::new(writer))),
            handshake: Handshake::AwaitInitialize,
            peer: "io".to_string(),
            _role: PhantomData,
        }
    }

    /// Name the peer in logs.
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    async fn next_message(&mut self) -> Option<RxJsonRpcMessage<R>> {
        loop {
            let writer = &self.writer;
            let peer = self.peer.as_str();
            let bytes = match read_frame(&mut self.reader).await {
                Ok(Frame::Line(bytes)) => bytes,
                Ok(Frame::TooLarge(size)) => {
                    reject::<R>(
                        writer,
                        peer,
                        None,
                        codes::INVALID_REQUEST,
                        format!("message too large: {size} bytes (max {MAX_MESSAGE_SIZE})"),
                    )
                    .await;
                    continue;
                }
                Ok(Frame::Eof) => {
                    debug!(%peer, "Peer closed the channel");
                    return None;
                }
                Err(e) => {
                    warn!(%peer, error = %e, "Read failed");
                    return None;
                }
            };

            let text = match std::str::from_utf8(&bytes) {
                Ok(text) => text,
                Err(e) => {
                    reject::<R>(writer, peer, None, codes::PARSE_ERROR, format!("invalid UTF-8: {e}")).await;
                    continue;
                }
            };
            let mut value: Value = match serde_json::from_str(text) {
                Ok(value) => value,
                Err(e) => {
                    reject::<R>(writer, peer, None, codes::PARSE_ERROR, e.to_string()).await;
                    continue;
                }
            };

            if !R::IS_CLIENT {
                pin_supported_version(&mut value);
            }
            let message = match serde_json::from_value::<RxJsonRpcMessage<R>>(value.clone()) {
                Ok(message) => message,
                Err(e) if R::IS_CLIENT => {
                    // A reply we cannot decode would leave its request hanging.
                    warn!(%peer, error = %e, "Undecodable message from host, closing");
                    return None;
                }
                Err(e) => {
                    let id = value.get("id").filter(|id| !id.is_null()).cloned();
                    reject::<R>(writer, peer, id, codes::INVALID_REQUEST, e.to_string()).await;
                    continue;
                }
            };

            if R::IS_CLIENT {
                return Some(message);
            }
            match self.handshake.admit(&value) {
                Admit::Pass => return Some(message),
                Admit::Drop => {}
                Admit::Reply(reply) => {
                    if let Err(e) = write_line(&self.writer, reply.to_string()).await {
                        warn!(%peer, error = %e, "Failed to send reply");
                        return None;
                    }
                }
            }
        }
    }
}

/// Answer a frame that never reached the session. Only the serving side
/// answers; a client just logs it.
async fn reject<R: ServiceRole>(
    writer: &Mutex<BoxedWriter>,
    peer: &str,
    id: Option<Value>,
    code: ErrorCode,
    detail: String,
) {
    warn!(%peer, code = code.0, %detail, "Rejected frame");
    if R::IS_CLIENT {
        return;
    }
    let reply = error_reply(
        id.unwrap_or(Value::Null),
        code,
        format!("{}: {detail}", code_name(code)),
    );
    if let Err(e) = write_line(writer, reply.to_string()).await {
        warn!(%peer, error = %e, "Failed to send error reply");
    }
}

async fn write_line(writer: &Mutex<BoxedWriter>, mut line: String) -> std::io::Result<()> {
    line.push('\n');
    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

impl<R: ServiceRole> rmcp::transport::Transport<R> for LineTransport<R> {
    type Error = std::io::Error;

    fn send(
        &mut self,
        item: TxJsonRpcMessage<R>,
    ) -> impl Future<Output = std::result::Result<(), Self::Error>> + Send + 'static {
        let writer = Arc::clone(&self.writer);
        let encoded = serde_json::to_string(&item).map_err(std::io::Error::other);
        async move { write_line(&writer, encoded?).await }
    }

    fn receive(&mut self) -> impl Future<Output = Option<RxJsonRpcMessage<R>>> + Send {
        self.next_message()
    }

    fn close(&mut self) -> impl Future<Output = std::result::Result<(), Self::Error>> + Send {
        let writer = Arc::clone(&self.writer);
        async move { writer.lock().await.shutdown().await }
    }
}
