//! Token acquisition for the display API.
//!
//! Tokens go stale after a few minutes, so the client stamps each token
//! with its acquisition time and re-authenticates before use once it ages
//! past [`TOKEN_MAX_AGE`]. A 401 mid-flight triggers one synchronous
//! re-auth and a single resend; two consecutive rejections surface as
//! `AuthExpired`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use super::error::DisplayError;

/// Age past which a cached token is assumed stale.
pub const TOKEN_MAX_AGE: Duration = Duration::from_secs(300);

/// How the client obtains a fresh bearer token. Seam for tests and for
/// alternative credential sources.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire(&self, http: &reqwest::Client) -> Result<String, DisplayError>;
}

/// A token plus when it was obtained.
#[derive(Debug, Clone)]
pub struct TokenState {
    pub token: String,
    pub acquired_at: Instant,
}

impl TokenState {
    pub fn is_stale(&self) -> bool {
        self.acquired_at.elapsed() >= TOKEN_MAX_AGE
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

/// Username/password exchange against `POST {base}/authenticate`.
pub struct PasswordTokenProvider {
    base_url: String,
    username: String,
    password: String,
}

impl PasswordTokenProvider {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl std::fmt::Debug for PasswordTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordTokenProvider")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for PasswordTokenProvider {
    async fn acquire(&self, http: &reqwest::Client) -> Result<String, DisplayError> {
        let endpoint = format!("{}/authenticate", self.base_url);
        let resp = http
            .post(&endpoint)
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await
            .map_err(|source| DisplayError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(DisplayError::AuthExpired(
                "credentials rejected by display API".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(DisplayError::Status { status, endpoint });
        }

        let auth: AuthResponse =
            resp.json()
                .await
                .map_err(|e| DisplayError::MalformedResponse {
                    endpoint,
                    detail: e.to_string(),
                })?;
        Ok(auth.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_stale() {
        let state = TokenState {
            token: "t".into(),
            acquired_at: Instant::now(),
        };
        assert!(!state.is_stale());
    }

    #[test]
    fn old_token_is_stale() {
        let state = TokenState {
            token: "t".into(),
            acquired_at: Instant::now() - TOKEN_MAX_AGE,
        };
        assert!(state.is_stale());
    }

    #[test]
    fn debug_redacts_password() {
        let p = PasswordTokenProvider::new("https://api.example.com/v0", "user", "hunter2");
        let debug = format!("{p:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
