//! Display device client (Meural Canvas cloud API).
//!
//! Every call authenticates with a short-lived token (see [`auth`]) sent
//! as `Authorization: Token <token>`. A 401 on any call triggers exactly
//! one synchronous re-authentication and one resend before the error is
//! surfaced.

pub mod auth;
pub mod describe;
pub mod error;
pub mod pages;

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::retry::{call_with_retry, RetryAction, RetryConfig};
use auth::{TokenProvider, TokenState};
pub use error::DisplayError;
pub use pages::{ItemsPage, PlaylistItem};

pub const DEFAULT_BASE_URL: &str = "https://api.meural.com/v0";

/// Metadata written onto a playlist item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMetadata {
    pub title: String,
    pub description: String,
    pub medium: String,
    pub year: Option<u16>,
}

/// Seam over the display device, mockable for reconciler tests.
#[async_trait]
pub trait DisplayApi: Send + Sync {
    /// All items in the playlist, pagination already flattened.
    async fn list_playlist_items(
        &self,
        playlist_id: &str,
    ) -> Result<Vec<PlaylistItem>, DisplayError>;

    /// Upload an image as a new item; returns the item id.
    async fn add_item(&self, image_path: &Path) -> Result<u64, DisplayError>;

    async fn add_item_to_playlist(
        &self,
        item_id: u64,
        playlist_id: &str,
    ) -> Result<(), DisplayError>;

    async fn remove_playlist_item(
        &self,
        item_id: u64,
        playlist_id: &str,
    ) -> Result<(), DisplayError>;

    async fn set_item_metadata(
        &self,
        item_id: u64,
        metadata: &ItemMetadata,
    ) -> Result<(), DisplayError>;
}

pub struct MeuralClient {
    http: reqwest::Client,
    base_url: String,
    token_provider: Box<dyn TokenProvider>,
    token: Mutex<Option<TokenState>>,
    retry: RetryConfig,
}

impl std::fmt::Debug for MeuralClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeuralClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl MeuralClient {
    pub fn new(
        base_url: &str,
        token_provider: Box<dyn TokenProvider>,
        retry: RetryConfig,
    ) -> Result<Self, DisplayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|source| DisplayError::Transport {
                endpoint: "client".to_string(),
                source,
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token_provider,
            token: Mutex::new(None),
            retry,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }

    /// Current token, re-acquired when absent, stale, or forced.
    async fn bearer(&self, force: bool) -> Result<String, DisplayError> {
        let mut guard = self.token.lock().await;
        let needs_refresh = force || guard.as_ref().map_or(true, TokenState::is_stale);
        if needs_refresh {
            tracing::debug!(forced = force, "Acquiring display API token");
            let token = self.token_provider.acquire(&self.http).await?;
            *guard = Some(TokenState {
                token,
                acquired_at: Instant::now(),
            });
        }
        Ok(guard.as_ref().map(|s| s.token.clone()).unwrap_or_default())
    }

    /// Send an authenticated request built by `build`. On 401, re-auth once
    /// and resend; a second 401 becomes `AuthExpired`.
    async fn send_authed<B>(&self, endpoint: &str, build: B) -> Result<reqwest::Response, DisplayError>
    where
        B: Fn() -> Result<reqwest::RequestBuilder, DisplayError>,
    {
        let mut forced = false;
        loop {
            let token = self.bearer(forced).await?;
            let resp = build()?
                .header("Authorization", format!("Token {token}"))
                .send()
                .await
                .map_err(|source| DisplayError::Transport {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
            if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
                if forced {
                    return Err(DisplayError::AuthExpired(format!(
                        "token rejected twice for {endpoint}"
                    )));
                }
                forced = true;
                continue;
            }
            return Ok(resp);
        }
    }

    async fn get_json(&self, endpoint: &str) -> Result<Value, DisplayError> {
        let url = self.url(endpoint);
        let resp = self
            .send_authed(endpoint, || Ok(self.http.get(&url)))
            .await?;
        check_status(resp.status(), endpoint)?;
        resp.json()
            .await
            .map_err(|e| DisplayError::MalformedResponse {
                endpoint: endpoint.to_string(),
                detail: e.to_string(),
            })
    }

    async fn fetch_items_page(
        &self,
        playlist_id: &str,
        page: u32,
    ) -> Result<ItemsPage, DisplayError> {
        let endpoint = format!("/user/galleries/{playlist_id}/items?page={page}");
        let body = self.get_json(&endpoint).await?;
        ItemsPage::parse(&body, page, &endpoint)
    }

    async fn upload_item_once(&self, image_path: &Path) -> Result<u64, DisplayError> {
        let endpoint = "/items";
        let url = self.url(endpoint);
        let bytes = tokio::fs::read(image_path).await?;
        let filename = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let resp = self
            .send_authed(endpoint, || {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(filename.clone())
                    .mime_str("image/jpeg")
                    .map_err(|source| DisplayError::Transport {
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
                Ok(self
                    .http
                    .post(&url)
                    .multipart(reqwest::multipart::Form::new().part("image", part)))
            })
            .await?;
        check_status(resp.status(), endpoint)?;

        let body: Value = resp
            .json()
            .await
            .map_err(|e| DisplayError::MalformedResponse {
                endpoint: endpoint.to_string(),
                detail: e.to_string(),
            })?;
        // Item id arrives either at the top level or under a data envelope.
        body.get("id")
            .or_else(|| body.pointer("/data/id"))
            .and_then(Value::as_u64)
            .ok_or_else(|| DisplayError::MalformedResponse {
                endpoint: endpoint.to_string(),
                detail: "upload response without item id".to_string(),
            })
    }

    fn classify(e: &DisplayError) -> RetryAction {
        if e.is_retryable() {
            RetryAction::Retry
        } else {
            RetryAction::Abort
        }
    }
}

#[async_trait]
impl DisplayApi for MeuralClient {
    async fn list_playlist_items(
        &self,
        playlist_id: &str,
    ) -> Result<Vec<PlaylistItem>, DisplayError> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let fetched = call_with_retry(&self.retry, Self::classify, || {
                self.fetch_items_page(playlist_id, page)
            })
            .await?;
            let next = fetched.next_page();
            all.extend(fetched.into_items());
            match next {
                Some(n) => page = n,
                None => break,
            }
        }
        tracing::debug!(playlist_id, count = all.len(), "Listed playlist items");
        Ok(all)
    }

    async fn add_item(&self, image_path: &Path) -> Result<u64, DisplayError> {
        call_with_retry(&self.retry, Self::classify, || {
            self.upload_item_once(image_path)
        })
        .await
    }

    async fn add_item_to_playlist(
        &self,
        item_id: u64,
        playlist_id: &str,
    ) -> Result<(), DisplayError> {
        let endpoint = format!("/galleries/{playlist_id}/items/{item_id}");
        let url = self.url(&endpoint);
        call_with_retry(&self.retry, Self::classify, || async {
            let resp = self
                .send_authed(&endpoint, || Ok(self.http.post(&url)))
                .await?;
            check_status(resp.status(), &endpoint)
        })
        .await
    }

    async fn remove_playlist_item(
        &self,
        item_id: u64,
        playlist_id: &str,
    ) -> Result<(), DisplayError> {
        let endpoint = format!("/galleries/{playlist_id}/items/{item_id}");
        let url = self.url(&endpoint);
        call_with_retry(&self.retry, Self::classify, || async {
            let resp = self
                .send_authed(&endpoint, || Ok(self.http.delete(&url)))
                .await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(DisplayError::NotFound(format!("playlist item {item_id}")));
            }
            check_status(resp.status(), &endpoint)
        })
        .await
    }

    async fn set_item_metadata(
        &self,
        item_id: u64,
        metadata: &ItemMetadata,
    ) -> Result<(), DisplayError> {
        let endpoint = format!("/items/{item_id}");
        let url = self.url(&endpoint);
        let year = metadata.year.map(|y| y.to_string()).unwrap_or_default();
        call_with_retry(&self.retry, Self::classify, || async {
            let form = [
                ("name", metadata.title.as_str()),
                ("description", metadata.description.as_str()),
                ("medium", metadata.medium.as_str()),
                ("year", year.as_str()),
            ];
            let resp = self
                .send_authed(&endpoint, || Ok(self.http.put(&url).form(&form)))
                .await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(DisplayError::NotFound(format!("item {item_id}")));
            }
            check_status(resp.status(), &endpoint)
        })
        .await
    }
}

fn check_status(status: reqwest::StatusCode, endpoint: &str) -> Result<(), DisplayError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(DisplayError::Status {
            status,
            endpoint: endpoint.to_string(),
        })
    }
}
