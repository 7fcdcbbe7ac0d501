//! Photo library client (Immich).
//!
//! All requests carry the API key header and go through the shared retry
//! helper; 404s map to entity-scoped `NotFound` and are never retried.

pub mod error;
pub mod responses;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt as _;
use tokio::io::AsyncWriteExt as _;

use crate::retry::{call_with_retry, RetryAction, RetryConfig};
use crate::types::parse_derivative_filename;
pub use error::LibraryError;
use responses::{AlbumResponse, PingResponse, UploadResponse};

const API_KEY_HEADER: &str = "x-api-key";
const DEVICE_ID: &str = "meural-sync";

/// One asset as listed by an album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumAsset {
    pub id: String,
    pub original_filename: String,
}

/// Seam over the photo library, mockable for reconciler tests.
#[async_trait]
pub trait LibraryApi: Send + Sync {
    /// All assets currently in `album_id`, in library order.
    async fn list_album_assets(&self, album_id: &str) -> Result<Vec<AlbumAsset>, LibraryError>;

    /// Download the original bytes of an asset into `dest_dir`; returns the
    /// written path. The filename is `<assetID>.<ext>` so the id survives
    /// on disk.
    async fn download_asset(&self, asset_id: &str, dest_dir: &Path)
        -> Result<PathBuf, LibraryError>;

    /// Publish a processed derivative into the output album. When the album
    /// already holds an asset with the same derivative filename, its content
    /// is replaced in place rather than duplicated. Returns the library id
    /// of the published asset.
    async fn upload_processed(
        &self,
        image_path: &Path,
        album_id: &str,
        original_asset_id: &str,
    ) -> Result<String, LibraryError>;
}

#[derive(Debug)]
pub struct ImmichClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl ImmichClient {
    pub fn new(base_url: &str, api_key: &str, retry: RetryConfig) -> Result<Self, LibraryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|source| LibraryError::Transport {
                endpoint: "client".to_string(),
                source,
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            retry,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api{}", self.base_url, endpoint)
    }

    /// Verify the server is reachable and the key is accepted.
    pub async fn ping(&self) -> Result<(), LibraryError> {
        let endpoint = "/server/ping";
        let resp = self
            .http
            .get(self.url(endpoint))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|source| LibraryError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let pong: PingResponse = parse_json(resp, endpoint).await?;
        if pong.res != "pong" {
            return Err(LibraryError::MalformedResponse {
                endpoint: endpoint.to_string(),
                detail: format!("unexpected ping reply {:?}", pong.res),
            });
        }
        Ok(())
    }

    async fn fetch_album(&self, album_id: &str) -> Result<AlbumResponse, LibraryError> {
        let endpoint = format!("/albums/{album_id}");
        let resp = self
            .http
            .get(self.url(&endpoint))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|source| LibraryError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LibraryError::NotFound(format!("album {album_id}")));
        }
        parse_json(resp, &endpoint).await
    }

    async fn fetch_asset_info(
        &self,
        asset_id: &str,
    ) -> Result<responses::AssetResponse, LibraryError> {
        let endpoint = format!("/assets/{asset_id}");
        let resp = self
            .http
            .get(self.url(&endpoint))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|source| LibraryError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LibraryError::NotFound(format!("asset {asset_id}")));
        }
        parse_json(resp, &endpoint).await
    }

    async fn download_once(
        &self,
        asset_id: &str,
        dest_dir: &Path,
        extension: &str,
    ) -> Result<PathBuf, LibraryError> {
        let endpoint = format!("/assets/{asset_id}/original");
        let resp = self
            .http
            .get(self.url(&endpoint))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|source| LibraryError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LibraryError::NotFound(format!("asset {asset_id}")));
        }
        if !resp.status().is_success() {
            return Err(LibraryError::Status {
                status: resp.status(),
                endpoint,
            });
        }

        let final_path = dest_dir.join(format!("{asset_id}.{extension}"));
        let tmp_path = dest_dir.join(format!("{asset_id}.{extension}.part"));
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| LibraryError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(final_path)
    }

    async fn create_asset(
        &self,
        image_path: &Path,
        original_asset_id: &str,
    ) -> Result<String, LibraryError> {
        let endpoint = "/assets";
        let bytes = tokio::fs::read(image_path).await?;
        let filename = file_name(image_path);
        let mtime: DateTime<Utc> = tokio::fs::metadata(image_path)
            .await?
            .modified()
            .map(Into::into)
            .unwrap_or_else(|_| Utc::now());

        let form = reqwest::multipart::Form::new()
            .part(
                "assetData",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(filename.clone())
                    .mime_str("image/jpeg")
                    .map_err(|source| LibraryError::Transport {
                        endpoint: endpoint.to_string(),
                        source,
                    })?,
            )
            // Ties the derivative back to its source asset on the server side.
            .text("deviceAssetId", original_asset_id.to_string())
            .text("deviceId", DEVICE_ID.to_string())
            .text("fileCreatedAt", mtime.to_rfc3339())
            .text("fileModifiedAt", mtime.to_rfc3339());

        let resp = self
            .http
            .post(self.url(endpoint))
            .header(API_KEY_HEADER, &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|source| LibraryError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let upload: UploadResponse = parse_json(resp, endpoint).await?;
        tracing::debug!(id = %upload.id, status = %upload.status, %filename, "Uploaded asset");
        Ok(upload.id)
    }

    async fn replace_asset(
        &self,
        asset_id: &str,
        image_path: &Path,
    ) -> Result<(), LibraryError> {
        let endpoint = format!("/assets/{asset_id}/original");
        let bytes = tokio::fs::read(image_path).await?;
        let form = reqwest::multipart::Form::new().part(
            "assetData",
            reqwest::multipart::Part::bytes(bytes)
                .file_name(file_name(image_path))
                .mime_str("image/jpeg")
                .map_err(|source| LibraryError::Transport {
                    endpoint: endpoint.clone(),
                    source,
                })?,
        );
        let resp = self
            .http
            .put(self.url(&endpoint))
            .header(API_KEY_HEADER, &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|source| LibraryError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LibraryError::NotFound(format!("asset {asset_id}")));
        }
        if !resp.status().is_success() {
            return Err(LibraryError::Status {
                status: resp.status(),
                endpoint,
            });
        }
        Ok(())
    }

    async fn add_to_album(&self, album_id: &str, asset_id: &str) -> Result<(), LibraryError> {
        let endpoint = format!("/albums/{album_id}/assets");
        let resp = self
            .http
            .put(self.url(&endpoint))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&serde_json::json!({ "ids": [asset_id] }))
            .send()
            .await
            .map_err(|source| LibraryError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LibraryError::NotFound(format!("album {album_id}")));
        }
        if !resp.status().is_success() {
            return Err(LibraryError::Status {
                status: resp.status(),
                endpoint,
            });
        }
        Ok(())
    }

    fn classify(e: &LibraryError) -> RetryAction {
        if e.is_retryable() {
            RetryAction::Retry
        } else {
            RetryAction::Abort
        }
    }
}

#[async_trait]
impl LibraryApi for ImmichClient {
    async fn list_album_assets(&self, album_id: &str) -> Result<Vec<AlbumAsset>, LibraryError> {
        let album =
            call_with_retry(&self.retry, Self::classify, || self.fetch_album(album_id)).await?;
        tracing::debug!(album = %album.album_name, count = album.assets.len(), "Listed album");
        Ok(album
            .assets
            .into_iter()
            .map(|a| AlbumAsset {
                id: a.id,
                original_filename: a.original_file_name,
            })
            .collect())
    }

    async fn download_asset(
        &self,
        asset_id: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, LibraryError> {
        // The extension comes from the library's own metadata so a HEIC or
        // PNG original does not end up with a lying .jpg name on disk.
        let info =
            call_with_retry(&self.retry, Self::classify, || self.fetch_asset_info(asset_id))
                .await?;
        let extension = Path::new(&info.original_file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "jpg".to_string());
        call_with_retry(&self.retry, Self::classify, || {
            self.download_once(asset_id, dest_dir, &extension)
        })
        .await
    }

    async fn upload_processed(
        &self,
        image_path: &Path,
        album_id: &str,
        original_asset_id: &str,
    ) -> Result<String, LibraryError> {
        let filename = file_name(image_path);

        // Re-publishing the same derivative replaces the existing asset's
        // bytes instead of accumulating duplicates in the album.
        let existing = self.list_album_assets(album_id).await?;
        if let Some(prior) = find_existing_derivative(&existing, &filename) {
            tracing::info!(asset_id = %prior.id, %filename, "Replacing existing derivative");
            let id = prior.id.clone();
            call_with_retry(&self.retry, Self::classify, || {
                self.replace_asset(&id, image_path)
            })
            .await?;
            return Ok(id);
        }

        let new_id = call_with_retry(&self.retry, Self::classify, || {
            self.create_asset(image_path, original_asset_id)
        })
        .await?;
        call_with_retry(&self.retry, Self::classify, || {
            self.add_to_album(album_id, &new_id)
        })
        .await?;
        tracing::info!(asset_id = %new_id, %filename, "Published derivative to album");
        Ok(new_id)
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    endpoint: &str,
) -> Result<T, LibraryError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(LibraryError::Status {
            status,
            endpoint: endpoint.to_string(),
        });
    }
    let body = resp.bytes().await.map_err(|source| LibraryError::Transport {
        endpoint: endpoint.to_string(),
        source,
    })?;
    serde_json::from_slice(&body).map_err(|e| LibraryError::MalformedResponse {
        endpoint: endpoint.to_string(),
        detail: e.to_string(),
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// An album asset counts as the same derivative when both filenames parse
/// to the same (AssetID, orientation) pair; the extension may differ (an
/// earlier publish could have been transcoded). Non-derivative names fall
/// back to exact equality.
fn find_existing_derivative<'a>(
    assets: &'a [AlbumAsset],
    filename: &str,
) -> Option<&'a AlbumAsset> {
    match parse_derivative_filename(filename) {
        Some(key) => assets
            .iter()
            .find(|a| parse_derivative_filename(&a.original_filename) == Some(key)),
        None => assets.iter().find(|a| a.original_filename == filename),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: &str, filename: &str) -> AlbumAsset {
        AlbumAsset {
            id: id.to_string(),
            original_filename: filename.to_string(),
        }
    }

    #[test]
    fn replacement_is_keyed_by_id_and_orientation() {
        let assets = vec![
            asset("lib-1", "a1_portrait.png"),
            asset("lib-2", "a1_landscape.jpg"),
        ];
        // Extension differs; the (id, orientation) pair still matches.
        let hit = find_existing_derivative(&assets, "a1_portrait.jpg").unwrap();
        assert_eq!(hit.id, "lib-1");
        let hit = find_existing_derivative(&assets, "a1_landscape.jpg").unwrap();
        assert_eq!(hit.id, "lib-2");
        assert!(find_existing_derivative(&assets, "a2_portrait.jpg").is_none());
    }

    #[test]
    fn non_derivative_names_match_exactly() {
        let assets = vec![asset("lib-1", "holiday.jpg")];
        assert!(find_existing_derivative(&assets, "holiday.jpg").is_some());
        assert!(find_existing_derivative(&assets, "holiday.png").is_none());
    }
}
