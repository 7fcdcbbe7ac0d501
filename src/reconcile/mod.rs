//! Three-way reconciliation between the photo library's output album, the
//! local store, and the display playlist.
//!
//! Membership is keyed by AssetID on both sides: album filenames encode it
//! as `<assetID>_<orientation>.<ext>`, playlist descriptions carry it as
//! their last line. Items whose description yields no id are invisible to
//! reconciliation and are never added, updated, or removed.

pub mod diff;
pub mod error;
pub mod report;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{stream, StreamExt as _};

use crate::exifmeta::{read_image_meta, ImageMeta};
use crate::immich::{LibraryApi, LibraryError};
use crate::lifecycle::LifecycleTracker;
use crate::meural::describe::{asset_id_from_description, build_description, descriptions_equivalent};
use crate::meural::{DisplayApi, DisplayError, ItemMetadata, PlaylistItem};
use crate::store::{RunLock, SidecarStore};
use crate::types::{parse_derivative_filename, Orientation};
pub use diff::{diff, Diff};
pub use error::RunError;
pub use report::{Comparison, ComparisonCounts, SyncOutcome, SyncReport};

const ITEM_MEDIUM: &str = "Photography";

/// One processed derivative as seen in the library's output album.
#[derive(Debug, Clone)]
struct LibraryEntry {
    /// Library id of the derivative asset (not the AssetID).
    library_asset_id: String,
    orientation: Orientation,
}

pub struct Reconciler {
    library: Arc<dyn LibraryApi>,
    display: Arc<dyn DisplayApi>,
    store: Arc<SidecarStore>,
    lifecycle: LifecycleTracker,
    playlist_id: String,
    output_album_id: String,
    concurrency: usize,
}

impl Reconciler {
    pub fn new(
        library: Arc<dyn LibraryApi>,
        display: Arc<dyn DisplayApi>,
        store: Arc<SidecarStore>,
        playlist_id: String,
        output_album_id: String,
        concurrency: usize,
    ) -> Self {
        let lifecycle = LifecycleTracker::new(store.clone());
        Self {
            library,
            display,
            store,
            lifecycle,
            playlist_id,
            output_album_id,
            concurrency: concurrency.max(1),
        }
    }

    fn check_config(&self) -> Result<(), RunError> {
        if self.playlist_id.trim().is_empty() {
            return Err(RunError::Configuration("playlist id is empty".to_string()));
        }
        if self.output_album_id.trim().is_empty() {
            return Err(RunError::Configuration(
                "output album id is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Run one reconciliation. Exactly one run may be in flight per work
    /// directory; a concurrent request gets `AlreadyRunning` immediately.
    pub async fn sync(&self) -> Result<SyncOutcome, RunError> {
        self.check_config()?;
        let _lock = match RunLock::try_acquire(self.store.state_dir())
            .map_err(|e| RunError::Lock(e.to_string()))?
        {
            Some(lock) => lock,
            None => {
                tracing::info!("Sync already in progress, refusing to start another");
                return Ok(SyncOutcome::AlreadyRunning);
            }
        };
        Ok(SyncOutcome::Completed(self.run().await))
    }

    /// Read-only diff of library versus playlist membership.
    pub async fn compare(&self) -> Result<Comparison, RunError> {
        self.check_config()?;
        let library = self
            .list_library()
            .await
            .map_err(|e| RunError::Remote(e.to_string()))?;
        let playlist = self
            .list_playlist()
            .await
            .map_err(|e| RunError::Remote(e.to_string()))?;

        let library_ids: BTreeSet<String> = library.keys().cloned().collect();
        let playlist_ids: BTreeSet<String> = playlist.keys().cloned().collect();
        let d = diff(&library_ids, &playlist_ids);

        Ok(Comparison {
            counts: ComparisonCounts {
                in_library: library_ids.len(),
                in_playlist: playlist_ids.len(),
                missing_on_playlist: d.to_add.len(),
                only_on_playlist: d.to_remove.len(),
            },
            in_library: library_ids.into_iter().collect(),
            in_playlist: playlist_ids.into_iter().collect(),
            missing_on_playlist: d.to_add,
            only_on_playlist: d.to_remove,
        })
    }

    async fn run(&self) -> SyncReport {
        let mut report = SyncReport::default();

        let library = match self.list_library().await {
            Ok(l) => l,
            Err(e) => {
                report.errors.push(format!("library listing: {e}"));
                return report.finalize();
            }
        };
        let playlist = match self.list_playlist().await {
            Ok(p) => p,
            Err(e) => {
                report.errors.push(format!("playlist listing: {e}"));
                return report.finalize();
            }
        };

        let library_ids: BTreeSet<String> = library.keys().cloned().collect();
        let playlist_ids: BTreeSet<String> = playlist.keys().cloned().collect();
        let d = diff(&library_ids, &playlist_ids);
        tracing::info!(
            add = d.to_add.len(),
            remove = d.to_remove.len(),
            update = d.to_update.len(),
            "Reconciliation plan"
        );

        // The three phases touch disjoint id sets, so per-id ordering only
        // matters inside a phase; phases themselves run to completion in
        // remove, add, update order.
        let removals = stream::iter(d.to_remove)
            .map(|id| {
                let items = playlist.get(&id).cloned().unwrap_or_default();
                async move { (self.remove_asset(&id, &items).await, id) }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        for (result, id) in removals {
            match result {
                Ok(()) => report.removed.push(id),
                Err(e) => report.errors.push(format!("{id}: {e}")),
            }
        }

        let additions = stream::iter(d.to_add)
            .map(|id| {
                let entry = library[&id].clone();
                async move { (self.add_asset(&id, &entry).await, id) }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        for (result, id) in additions {
            match result {
                Ok(()) => report.added.push(id),
                Err(e) => report.errors.push(format!("{id}: {e}")),
            }
        }

        let updates = stream::iter(d.to_update)
            .map(|id| {
                let items = playlist.get(&id).cloned().unwrap_or_default();
                async move { (self.refresh_asset(&id, &items).await, id) }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        for (result, id) in updates {
            match result {
                Ok(true) => report.updated.push(id),
                Ok(false) => {}
                Err(e) => report.errors.push(format!("{id}: {e}")),
            }
        }

        report.added.sort();
        report.removed.sort();
        report.updated.sort();
        report.finalize()
    }

    /// AssetID -> derivative entry, from output album filenames. Album
    /// assets whose filenames do not follow the derivative convention are
    /// skipped. Only one derivative per id drives playlist membership.
    async fn list_library(&self) -> Result<BTreeMap<String, LibraryEntry>, LibraryError> {
        let assets = self.library.list_album_assets(&self.output_album_id).await?;
        let mut by_id = BTreeMap::new();
        for asset in assets {
            let Some((asset_id, orientation)) = parse_derivative_filename(&asset.original_filename)
            else {
                tracing::debug!(filename = %asset.original_filename, "Skipping non-derivative album asset");
                continue;
            };
            by_id.entry(asset_id.to_string()).or_insert(LibraryEntry {
                library_asset_id: asset.id,
                orientation,
            });
        }
        Ok(by_id)
    }

    /// AssetID -> playlist items claiming that id. Items without a
    /// parseable id are dropped here, which is what keeps them orphaned
    /// and safe from every later phase.
    async fn list_playlist(&self) -> Result<BTreeMap<String, Vec<PlaylistItem>>, DisplayError> {
        let items = self.display.list_playlist_items(&self.playlist_id).await?;
        let mut by_id: BTreeMap<String, Vec<PlaylistItem>> = BTreeMap::new();
        for item in items {
            match asset_id_from_description(&item.description) {
                Some(id) => by_id.entry(id.to_string()).or_default().push(item),
                None => {
                    tracing::debug!(item_id = item.item_id, "Ignoring playlist item without asset id")
                }
            }
        }
        Ok(by_id)
    }

    async fn remove_asset(&self, id: &str, items: &[PlaylistItem]) -> Result<(), DisplayError> {
        for item in items {
            match self
                .display
                .remove_playlist_item(item.item_id, &self.playlist_id)
                .await
            {
                Ok(()) => {}
                // Already gone is the state we wanted.
                Err(DisplayError::NotFound(_)) => {
                    tracing::debug!(id, item_id = item.item_id, "Item already absent")
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(id, count = items.len(), "Removed from playlist");
        Ok(())
    }

    async fn add_asset(&self, id: &str, entry: &LibraryEntry) -> Result<(), anyhow::Error> {
        let image_path = self.resolve_upload_source(id, entry).await?;
        let metadata = self.item_metadata(id)?;

        let item_id = self.display.add_item(&image_path).await?;
        self.display.set_item_metadata(item_id, &metadata).await?;
        self.display
            .add_item_to_playlist(item_id, &self.playlist_id)
            .await?;
        self.lifecycle.mark_completed(id)?;
        tracing::info!(id, item_id, "Added to playlist");
        Ok(())
    }

    /// The local derivative is preferred; when it is missing (state was
    /// rebuilt, or another machine did the cropping) the processed bytes
    /// are fetched back from the library.
    async fn resolve_upload_source(
        &self,
        id: &str,
        entry: &LibraryEntry,
    ) -> Result<PathBuf, anyhow::Error> {
        let local = self.store.derivative_path(id, entry.orientation);
        if local.exists() {
            return Ok(local);
        }
        let downloads = self.store.state_dir().join("downloads");
        tokio::fs::create_dir_all(&downloads).await?;
        tracing::debug!(id, "Local derivative missing, fetching from library");
        let path = self
            .library
            .download_asset(&entry.library_asset_id, &downloads)
            .await?;
        Ok(path)
    }

    fn item_metadata(&self, id: &str) -> Result<ItemMetadata, anyhow::Error> {
        let record = self.store.get(id)?;
        let (title, meta) = match &record {
            Some(r) => {
                let meta = r
                    .local_original_path
                    .as_deref()
                    .map(read_image_meta)
                    .unwrap_or_default();
                let title = std::path::Path::new(&r.original_filename)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| id.to_string());
                (title, meta)
            }
            None => (id.to_string(), ImageMeta::default()),
        };
        Ok(ItemMetadata {
            description: build_description(&meta, id),
            year: meta.year,
            title,
            medium: ITEM_MEDIUM.to_string(),
        })
    }

    /// Refresh caption metadata on items whose caption drifted from what
    /// local metadata says it should be. Returns whether anything changed.
    async fn refresh_asset(
        &self,
        id: &str,
        items: &[PlaylistItem],
    ) -> Result<bool, anyhow::Error> {
        let expected = self.item_metadata(id)?;
        let mut changed = false;
        for item in items {
            if !descriptions_equivalent(&item.description, &expected.description) {
                self.display.set_item_metadata(item.item_id, &expected).await?;
                tracing::info!(id, item_id = item.item_id, "Refreshed item metadata");
                changed = true;
            }
        }
        Ok(changed)
    }
}
