//! MCP error types.

use rmcp::ErrorData;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The channel could not be opened or broke mid-call.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer closed the channel, or the session was already torn down.
    #[error("channel closed")]
    ChannelClosed,

    #[error("timeout waiting for response")]
    Timeout,

    /// An operation was issued out of handshake order.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON-RPC error: {0}")]
    Rpc(ErrorData),
}

impl Error {
    /// Whether the session that produced this error is unusable afterwards.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ChannelClosed | Self::Timeout | Self::Handshake(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
