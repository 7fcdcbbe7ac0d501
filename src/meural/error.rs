use thiserror::Error;

/// Errors from the display device API.
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("display API returned HTTP {status} for {endpoint}")]
    Status {
        status: reqwest::StatusCode,
        endpoint: String,
    },

    #[error("malformed response from {endpoint}: {detail}")]
    MalformedResponse { endpoint: String, detail: String },

    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("authentication rejected: {0}")]
    AuthExpired(String),

    #[error("display API error: {0}")]
    Api(String),

    #[error("disk error: {0}")]
    Disk(#[from] std::io::Error),
}

impl DisplayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::Disk(_) | Self::Api(_) => false,
            // Handled by synchronous re-auth, not by backoff.
            Self::AuthExpired(_) => false,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            Self::MalformedResponse { .. } => true,
            Self::Transport { .. } => true,
        }
    }
}
