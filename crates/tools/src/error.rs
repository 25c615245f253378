use thiserror::Error;

/// Failure talking to an external data provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider config: {0}")]
    Config(String),

    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    #[error("provider api ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Turn a non-success HTTP response into [`ProviderError::Api`].
    pub(crate) async fn check(response: reqwest::Response) -> Result<reqwest::Response, Self> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Self::Api { status, body })
    }
}
