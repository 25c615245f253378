//! CLI error types.

use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration is invalid or could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No configured server has the requested name.
    #[error("no server named '{0}' in config")]
    UnknownServer(String),

    /// A query with no text.
    #[error("query must not be empty")]
    EmptyQuery,

    /// The agent or the model failed.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// Talking to a tool host failed.
    #[error(transparent)]
    Mcp(#[from] mcp::Error),

    /// A tool catalogue could not be assembled.
    #[error(transparent)]
    Registry(#[from] mcp::RegistryError),

    /// A data provider client could not be set up.
    #[error(transparent)]
    Provider(#[from] tools::ProviderError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
