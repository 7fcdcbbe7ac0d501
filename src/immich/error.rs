use thiserror::Error;

/// Errors from the photo library API.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("library returned HTTP {status} for {endpoint}")]
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

    #[error("disk error: {0}")]
    Disk(#[from] std::io::Error),
}

impl LibraryError {
    /// Whether another identical attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::Disk(_) => false,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            // Truncated bodies show up as parse failures; worth one more try.
            Self::MalformedResponse { .. } => true,
            Self::Transport { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_by_variant() {
        assert!(!LibraryError::NotFound("asset a1".into()).is_retryable());
        assert!(LibraryError::Status {
            status: reqwest::StatusCode::BAD_GATEWAY,
            endpoint: "/albums/x".into(),
        }
        .is_retryable());
        assert!(LibraryError::Status {
            status: reqwest::StatusCode::TOO_MANY_REQUESTS,
            endpoint: "/albums/x".into(),
        }
        .is_retryable());
        assert!(!LibraryError::Status {
            status: reqwest::StatusCode::UNAUTHORIZED,
            endpoint: "/albums/x".into(),
        }
        .is_retryable());
    }
}
