//! Processing-state tracker layered on the sidecar store.
//!
//! Owns the transition rules between crop states and the sticky
//! `completed` flag; the store just persists what this module decides.

use std::sync::Arc;

use crate::store::{ProcessingState, SidecarStore, StoreError};
use crate::types::{parse_derivative_filename, Orientation};

#[derive(Debug, Clone)]
pub struct LifecycleTracker {
    store: Arc<SidecarStore>,
}

impl LifecycleTracker {
    pub fn new(store: Arc<SidecarStore>) -> Self {
        Self { store }
    }

    /// Current state for an asset; unknown assets are `Unprocessed`.
    pub fn state(&self, asset_id: &str) -> Result<ProcessingState, StoreError> {
        Ok(self
            .store
            .read_progress()?
            .get(asset_id)
            .copied()
            .unwrap_or(ProcessingState::Unprocessed))
    }

    /// Apply a successful crop for one orientation.
    pub fn record_crop(
        &self,
        asset_id: &str,
        orientation: Orientation,
    ) -> Result<ProcessingState, StoreError> {
        let (current, next) = self.store.update_progress(|progress| {
            let current = progress
                .get(asset_id)
                .copied()
                .unwrap_or(ProcessingState::Unprocessed);
            let next = current.after_crop(orientation);
            if next != current {
                progress.insert(asset_id.to_string(), next);
            }
            (current, next)
        })?;
        if next != current {
            tracing::info!(asset_id, from = current.as_str(), to = next.as_str(), "Crop recorded");
        }
        Ok(next)
    }

    /// Mark an asset as published. Idempotent; completed never regresses.
    pub fn mark_completed(&self, asset_id: &str) -> Result<(), StoreError> {
        let newly = self.store.update_progress(|progress| {
            if progress.get(asset_id) != Some(&ProcessingState::Completed) {
                progress.insert(asset_id.to_string(), ProcessingState::Completed);
                true
            } else {
                false
            }
        })?;
        if newly {
            tracing::info!(asset_id, "Marked completed");
        }
        Ok(())
    }

    /// Forget an asset entirely so it can be processed from scratch.
    pub fn reset(&self, asset_id: &str) -> Result<(), StoreError> {
        self.store.remove(asset_id)?;
        tracing::info!(asset_id, "Asset reset");
        Ok(())
    }

    /// Rebuild completed markers from the filenames present in the output
    /// album, for recovery after losing local state. Returns how many
    /// assets were newly marked.
    pub fn rederive_completed(&self, output_filenames: &[String]) -> Result<usize, StoreError> {
        let marked = self.store.update_progress(|progress| {
            let mut marked = 0;
            for name in output_filenames {
                let Some((asset_id, _)) = parse_derivative_filename(name) else {
                    tracing::debug!(filename = %name, "Skipping unrecognized output filename");
                    continue;
                };
                if progress.get(asset_id) != Some(&ProcessingState::Completed) {
                    progress.insert(asset_id.to_string(), ProcessingState::Completed);
                    marked += 1;
                }
            }
            marked
        })?;
        if marked > 0 {
            tracing::info!(count = marked, "Rederived completed assets from output album");
        }
        Ok(marked)
    }
}
