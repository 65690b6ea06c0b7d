use thiserror::Error;

/// Failure taxonomy for connector sync runs.
///
/// `Authentication` and `RateLimit` abort the current sync attempt; the
/// connector is left in `error` status and retried on the next scheduled
/// cycle. `Download` is fatal per item during materialization and fatal per
/// call everywhere else.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("[{provider}] authentication failed: {reason}")]
    Authentication { provider: String, reason: String },

    #[error("[{provider}] rate limit retries exhausted")]
    RateLimit { provider: String },

    #[error("[{provider}] API error {status} at {url}: {body}")]
    Download {
        provider: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid provider config: {0}")]
    Config(String),

    #[error("invalid checkpoint state: {0}")]
    State(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unsupported source type: {0}")]
    UnsupportedSource(String),

    #[error(transparent)]
    Repository(#[from] lodestone_common::error::LodestoneError),
}

impl ConnectorError {
    pub fn auth(provider: &str, reason: impl Into<String>) -> Self {
        Self::Authentication {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }
}
