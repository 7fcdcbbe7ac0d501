mod cli;
mod config;
mod exifmeta;
mod immich;
mod lifecycle;
mod meural;
mod reconcile;
mod retry;
mod shutdown;
mod store;
mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use futures_util::{stream, StreamExt as _};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::Config;
use immich::{ImmichClient, LibraryApi, LibraryError};
use lifecycle::LifecycleTracker;
use meural::auth::PasswordTokenProvider;
use meural::MeuralClient;
use reconcile::{Reconciler, SyncOutcome};
use store::SidecarStore;
use types::LogLevel;

fn init_tracing(level: LogLevel) {
    let default = match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_cli(&cli)?;
    init_tracing(config.log_level);
    tracing::debug!(?config, "Resolved configuration");

    let store = Arc::new(SidecarStore::open(
        config.work_dir.join("input"),
        config.work_dir.join("output"),
        config.work_dir.join("state"),
    )?);
    let lifecycle = LifecycleTracker::new(store.clone());

    match cli.command {
        // Local-only commands need no network at all.
        Command::Status => {
            print_status(&store)?;
            return Ok(());
        }
        Command::Reset { asset_id } => {
            lifecycle.reset(&asset_id)?;
            println!("Reset {asset_id}");
            return Ok(());
        }
        Command::Pull | Command::Push | Command::Sync | Command::Compare => {}
    }

    let library = Arc::new(ImmichClient::new(
        &config.immich_url,
        &config.immich_api_key,
        config.retry.clone(),
    )?);
    library
        .ping()
        .await
        .context("photo library is unreachable")?;

    match cli.command {
        Command::Pull => {
            pull_originals(&config, library.as_ref(), &store).await?;
            return Ok(());
        }
        Command::Push => {
            let (pushed, failed) =
                push_derivatives(&config.output_album_id, library.as_ref(), &store, &lifecycle)
                    .await?;
            println!("Pushed {pushed} derivative(s), {failed} failed");
            if failed > 0 {
                std::process::exit(1);
            }
            return Ok(());
        }
        _ => {}
    }

    let password = match &config.meural_password {
        Some(p) => p.clone(),
        None => rpassword::prompt_password(format!(
            "Meural password for {}: ",
            config.meural_username
        ))
        .context("failed to read password")?,
    };
    let display = Arc::new(MeuralClient::new(
        meural::DEFAULT_BASE_URL,
        Box::new(PasswordTokenProvider::new(
            meural::DEFAULT_BASE_URL,
            &config.meural_username,
            &password,
        )),
        config.retry.clone(),
    )?);

    let reconciler = Reconciler::new(
        library.clone(),
        display,
        store.clone(),
        config.playlist_id.clone(),
        config.output_album_id.clone(),
        config.concurrency,
    );

    match cli.command {
        Command::Compare => {
            let comparison = reconciler.compare().await?;
            println!("{}", serde_json::to_string_pretty(&comparison)?);
        }
        Command::Sync => {
            rederive_completed(&config, library.as_ref(), &lifecycle).await;
            match config.watch_interval {
                None => {
                    let ok = run_once(&reconciler).await?;
                    if !ok {
                        std::process::exit(1);
                    }
                }
                Some(interval) => {
                    let token = shutdown::shutdown_token();
                    loop {
                        if let Err(e) = run_once(&reconciler).await {
                            tracing::error!("Sync run failed: {e:#}");
                        }
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(interval) => {}
                        }
                    }
                    tracing::info!("Watch loop stopped");
                }
            }
        }
        _ => unreachable!("handled above"),
    }
    Ok(())
}

/// Run one reconciliation and print its report. Returns whether it
/// succeeded; "already running" counts as success for exit purposes.
async fn run_once(reconciler: &Reconciler) -> anyhow::Result<bool> {
    match reconciler.sync().await? {
        SyncOutcome::Completed(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(report.success)
        }
        SyncOutcome::AlreadyRunning => {
            println!("A sync is already in progress");
            Ok(true)
        }
    }
}

/// Rebuild completed markers from the output album, so a fresh work
/// directory does not re-add everything. Best effort; a failure here only
/// costs redundant work later.
async fn rederive_completed(
    config: &Config,
    library: &dyn LibraryApi,
    lifecycle: &LifecycleTracker,
) {
    match library.list_album_assets(&config.output_album_id).await {
        Ok(assets) => {
            let names: Vec<String> = assets.into_iter().map(|a| a.original_filename).collect();
            match lifecycle.rederive_completed(&names) {
                Ok(0) => {}
                Ok(n) => tracing::info!(count = n, "Recovered completed markers"),
                Err(e) => tracing::warn!("Could not persist recovered markers: {e}"),
            }
        }
        Err(e) => tracing::warn!("Could not list output album for recovery: {e}"),
    }
}

/// Download originals from the input album that have no local record yet.
async fn pull_originals(
    config: &Config,
    library: &dyn LibraryApi,
    store: &Arc<SidecarStore>,
) -> anyhow::Result<()> {
    let assets = library
        .list_album_assets(&config.input_album_id)
        .await
        .context("failed to list input album")?;

    let mut pending = Vec::new();
    for asset in assets {
        if store.get(&asset.id)?.is_none() {
            pending.push(asset);
        }
    }
    tracing::info!(count = pending.len(), "New originals to download");

    let results = stream::iter(pending)
        .map(|asset| async move {
            let result: Result<(), LibraryError> = async {
                let path = library.download_asset(&asset.id, store.input_dir()).await?;
                store
                    .upsert_original(&asset.id, &asset.original_filename, &path)
                    .map_err(std::io::Error::other)?;
                Ok(())
            }
            .await;
            (asset, result)
        })
        .buffer_unordered(config.concurrency)
        .collect::<Vec<_>>()
        .await;

    let mut downloaded = 0usize;
    for (asset, result) in results {
        match result {
            Ok(()) => {
                downloaded += 1;
                tracing::info!(id = %asset.id, filename = %asset.original_filename, "Downloaded");
            }
            Err(e) => tracing::warn!(id = %asset.id, "Download failed: {e}"),
        }
    }
    println!("Downloaded {downloaded} new original(s)");
    Ok(())
}

/// Upload every locally cropped derivative not yet published to the
/// output album. Re-pushing an already-published derivative replaces it
/// in place, so this is safe to run repeatedly. An asset whose derivatives
/// all uploaded is marked completed, so `status` reflects publication
/// without waiting for a later sync. Returns (pushed, failed) counts.
async fn push_derivatives(
    output_album_id: &str,
    library: &dyn LibraryApi,
    store: &Arc<SidecarStore>,
    lifecycle: &LifecycleTracker,
) -> anyhow::Result<(usize, usize)> {
    let candidates: Vec<_> = store
        .list_all()?
        .into_iter()
        .filter(|r| r.status != store::ProcessingState::Completed && !r.derivatives.is_empty())
        .collect();
    tracing::info!(count = candidates.len(), "Assets with derivatives to push");

    let mut pushed = 0usize;
    let mut failed = 0usize;
    for record in candidates {
        let mut record_ok = true;
        for derivative in record.derivatives.values() {
            match library
                .upload_processed(&derivative.path, output_album_id, &record.id)
                .await
            {
                Ok(library_id) => {
                    pushed += 1;
                    tracing::info!(id = %record.id, %library_id, "Pushed derivative");
                }
                Err(e) => {
                    failed += 1;
                    record_ok = false;
                    tracing::warn!(id = %record.id, "Push failed: {e}");
                }
            }
        }
        if record_ok {
            lifecycle.mark_completed(&record.id)?;
        }
    }
    Ok((pushed, failed))
}

fn print_status(store: &SidecarStore) -> anyhow::Result<()> {
    let records = store.list_all()?;
    let mut by_state: BTreeMap<&'static str, usize> = BTreeMap::new();
    for record in &records {
        *by_state.entry(record.status.as_str()).or_default() += 1;
    }
    let summary = serde_json::json!({
        "total": records.len(),
        "by_state": by_state,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use crate::immich::AlbumAsset;
    use crate::store::{CropRect, ProcessingState};
    use crate::types::Orientation;

    #[derive(Default)]
    struct RecordingLibrary {
        uploads: Mutex<Vec<String>>,
        fail_matching: Option<String>,
    }

    #[async_trait]
    impl LibraryApi for RecordingLibrary {
        async fn list_album_assets(
            &self,
            _album_id: &str,
        ) -> Result<Vec<AlbumAsset>, LibraryError> {
            Ok(Vec::new())
        }

        async fn download_asset(
            &self,
            asset_id: &str,
            _dest_dir: &Path,
        ) -> Result<PathBuf, LibraryError> {
            Err(LibraryError::NotFound(format!("asset {asset_id}")))
        }

        async fn upload_processed(
            &self,
            image_path: &Path,
            _album_id: &str,
            original_asset_id: &str,
        ) -> Result<String, LibraryError> {
            let name = image_path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned();
            if let Some(pat) = &self.fail_matching {
                if name.contains(pat.as_str()) {
                    return Err(LibraryError::Status {
                        status: reqwest::StatusCode::BAD_GATEWAY,
                        endpoint: "/assets".to_string(),
                    });
                }
            }
            self.uploads.lock().unwrap().push(name);
            Ok(format!("lib-{original_asset_id}"))
        }
    }

    fn scratch_store(name: &str) -> Arc<SidecarStore> {
        let dir = std::env::temp_dir().join("meural_sync_tests").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        Arc::new(
            SidecarStore::open(dir.join("input"), dir.join("output"), dir.join("state")).unwrap(),
        )
    }

    fn seed_cropped_asset(store: &SidecarStore, id: &str, orientation: Orientation) {
        let original = store.input_dir().join(format!("{id}.jpg"));
        std::fs::write(&original, b"bytes").unwrap();
        store
            .upsert_original(id, &format!("{id}.jpg"), &original)
            .unwrap();
        let scratch = store.state_dir().join(format!("{id}.scratch.jpg"));
        std::fs::write(&scratch, b"jpeg").unwrap();
        let rect = CropRect {
            x: 0,
            y: 0,
            width: 800,
            height: 600,
        };
        store.upsert_derivative(id, orientation, &scratch, rect).unwrap();
    }

    #[tokio::test]
    async fn push_marks_uploaded_assets_completed() {
        let store = scratch_store("main_push_completed");
        let lifecycle = LifecycleTracker::new(store.clone());
        seed_cropped_asset(&store, "a1", Orientation::Portrait);
        let library = RecordingLibrary::default();

        let (pushed, failed) = push_derivatives("out-album", &library, &store, &lifecycle)
            .await
            .unwrap();
        assert_eq!((pushed, failed), (1, 0));
        assert_eq!(
            library.uploads.lock().unwrap().as_slice(),
            ["a1_portrait.jpg"]
        );
        assert_eq!(lifecycle.state("a1").unwrap(), ProcessingState::Completed);

        // Completed assets are skipped on the next run.
        let (pushed, failed) = push_derivatives("out-album", &library, &store, &lifecycle)
            .await
            .unwrap();
        assert_eq!((pushed, failed), (0, 0));
    }

    #[tokio::test]
    async fn failed_push_leaves_lifecycle_untouched() {
        let store = scratch_store("main_push_failed");
        let lifecycle = LifecycleTracker::new(store.clone());
        seed_cropped_asset(&store, "a1", Orientation::Portrait);
        seed_cropped_asset(&store, "a2", Orientation::Landscape);
        let library = RecordingLibrary {
            fail_matching: Some("a1_".to_string()),
            ..Default::default()
        };

        let (pushed, failed) = push_derivatives("out-album", &library, &store, &lifecycle)
            .await
            .unwrap();
        assert_eq!((pushed, failed), (1, 1));
        assert_ne!(lifecycle.state("a1").unwrap(), ProcessingState::Completed);
        assert_eq!(lifecycle.state("a2").unwrap(), ProcessingState::Completed);
    }
}
