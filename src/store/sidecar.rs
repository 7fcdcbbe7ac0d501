//! Sidecar-file implementation of the asset store.
//!
//! Layout under the work directory:
//!
//! ```text
//! input/<assetID>.<ext>              downloaded originals
//! input/.metadata/<assetID>.json     per-asset sidecar record
//! output/portrait/<assetID>_portrait.jpg
//! output/landscape/<assetID>_landscape.jpg
//! state/crops.json                   per-asset crop rectangles
//! state/progress.json                per-asset processing state
//! state/sync.lock                    advisory run lock
//! ```
//!
//! Every mutation writes a temp file and renames it into place, so a crash
//! immediately after a successful return cannot lose the mutation. The two
//! shared files (`crops.json`, `progress.json`) are read-modify-write, so
//! their mutations are serialized behind an in-process mutex; concurrent
//! per-asset tasks otherwise drop each other's updates.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::StoreError;
use super::types::{AssetRecord, AssetSidecar, CropRect, CropsFile, Derivative, ProcessingState};
use crate::types::{derivative_filename, Orientation};

const METADATA_DIR: &str = ".metadata";
const CROPS_FILE: &str = "crops.json";
const PROGRESS_FILE: &str = "progress.json";

#[derive(Debug)]
pub struct SidecarStore {
    input_dir: PathBuf,
    output_dir: PathBuf,
    state_dir: PathBuf,
    /// Serializes read-modify-write cycles on the shared state files.
    mutations: Mutex<()>,
}

impl SidecarStore {
    /// Open (and if necessary create) the store directories.
    pub fn open(input_dir: PathBuf, output_dir: PathBuf, state_dir: PathBuf) -> Result<Self, StoreError> {
        let store = Self {
            input_dir,
            output_dir,
            state_dir,
            mutations: Mutex::new(()),
        };
        for dir in [
            store.metadata_dir(),
            store.output_dir.join(Orientation::Portrait.as_str()),
            store.output_dir.join(Orientation::Landscape.as_str()),
            store.state_dir.clone(),
        ] {
            fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir { path: dir, source })?;
        }
        Ok(store)
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn metadata_dir(&self) -> PathBuf {
        self.input_dir.join(METADATA_DIR)
    }

    fn sidecar_path(&self, asset_id: &str) -> PathBuf {
        self.metadata_dir().join(format!("{asset_id}.json"))
    }

    /// Where the derivative for (id, orientation) lives, whether or not it
    /// currently exists. This path is the contract with the crop collaborator
    /// and the upload path.
    pub fn derivative_path(&self, asset_id: &str, orientation: Orientation) -> PathBuf {
        self.output_dir
            .join(orientation.as_str())
            .join(derivative_filename(asset_id, orientation))
    }

    // ── record access ──────────────────────────────────────────────────

    /// Look up an asset. `None` when the asset has never been seen.
    pub fn get(&self, asset_id: &str) -> Result<Option<AssetRecord>, StoreError> {
        let path = self.sidecar_path(asset_id);
        let sidecar: AssetSidecar = match read_json(&path)? {
            Some(s) => s,
            None => return Ok(None),
        };
        Ok(Some(self.assemble(sidecar)?))
    }

    /// Record that an original has been downloaded for `asset_id`.
    /// Creates the asset record if this is the first time the id is seen.
    pub fn upsert_original(
        &self,
        asset_id: &str,
        original_filename: &str,
        local_path: &Path,
    ) -> Result<(), StoreError> {
        let sidecar = AssetSidecar {
            asset_id: asset_id.to_string(),
            original_filename: original_filename.to_string(),
            file_path: Some(local_path.to_path_buf()),
        };
        write_json_atomic(&self.sidecar_path(asset_id), &sidecar)
    }

    /// Record a successful crop: moves the produced file into its canonical
    /// location (unless it is already there) and persists the rectangle.
    /// Idempotent; a re-crop for the same orientation overwrites the prior
    /// entry.
    pub fn upsert_derivative(
        &self,
        asset_id: &str,
        orientation: Orientation,
        produced: &Path,
        rect: CropRect,
    ) -> Result<(), StoreError> {
        let canonical = self.derivative_path(asset_id, orientation);
        if produced != canonical {
            fs::rename(produced, &canonical).map_err(|e| StoreError::io(&canonical, e))?;
        }
        self.set_crop_rect(asset_id, orientation, rect)
    }

    /// Persist a crop rectangle independently of whether the derivative file
    /// exists, so crop parameters survive the file being deleted and redone.
    pub fn set_crop_rect(
        &self,
        asset_id: &str,
        orientation: Orientation,
        rect: CropRect,
    ) -> Result<(), StoreError> {
        let _guard = self.lock_mutations();
        let path = self.state_dir.join(CROPS_FILE);
        let mut crops: CropsFile = read_json(&path)?.unwrap_or_default();
        crops
            .crops
            .entry(asset_id.to_string())
            .or_default()
            .insert(orientation, rect);
        write_json_atomic(&path, &crops)
    }

    pub fn crop_rect(
        &self,
        asset_id: &str,
        orientation: Orientation,
    ) -> Result<Option<CropRect>, StoreError> {
        let path = self.state_dir.join(CROPS_FILE);
        let crops: CropsFile = read_json(&path)?.unwrap_or_default();
        Ok(crops
            .crops
            .get(asset_id)
            .and_then(|per| per.get(&orientation))
            .copied())
    }

    /// Delete the record, its derivative files, its crop rectangles, and its
    /// progress entry. Safe to call for an unknown id.
    pub fn remove(&self, asset_id: &str) -> Result<(), StoreError> {
        for orientation in Orientation::ALL {
            let path = self.derivative_path(asset_id, orientation);
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(asset_id, %orientation, "Deleted derivative"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }

        {
            let _guard = self.lock_mutations();
            let crops_path = self.state_dir.join(CROPS_FILE);
            let mut crops: CropsFile = read_json(&crops_path)?.unwrap_or_default();
            if crops.crops.remove(asset_id).is_some() {
                write_json_atomic(&crops_path, &crops)?;
            }
        }

        self.update_progress(|progress| {
            progress.remove(asset_id);
        })?;

        // Remove the original and its sidecar last, so a crash mid-removal
        // leaves the asset discoverable rather than half-forgotten.
        if let Some(sidecar) = read_json::<AssetSidecar>(&self.sidecar_path(asset_id))? {
            if let Some(original) = sidecar.file_path {
                let _ = fs::remove_file(&original);
            }
            let path = self.sidecar_path(asset_id);
            fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        }
        Ok(())
    }

    /// Enumerate all known assets. Ordering is by id and carries no meaning.
    pub fn list_all(&self) -> Result<Vec<AssetRecord>, StoreError> {
        let dir = self.metadata_dir();
        let mut records = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let name = entry.file_name();
            let Some(asset_id) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Some(record) = self.get(asset_id)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    // ── progress map (consumed by the lifecycle tracker) ───────────────

    pub fn read_progress(&self) -> Result<BTreeMap<String, ProcessingState>, StoreError> {
        let path = self.state_dir.join(PROGRESS_FILE);
        Ok(read_json(&path)?.unwrap_or_default())
    }

    /// Apply `mutate` to the progress map under the mutation lock and
    /// persist the result if it changed. All progress writes go through
    /// here so concurrent per-asset updates cannot overwrite each other.
    pub fn update_progress<T>(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<String, ProcessingState>) -> T,
    ) -> Result<T, StoreError> {
        let _guard = self.lock_mutations();
        let path = self.state_dir.join(PROGRESS_FILE);
        let mut progress: BTreeMap<String, ProcessingState> =
            read_json(&path)?.unwrap_or_default();
        let before = progress.clone();
        let out = mutate(&mut progress);
        if progress != before {
            write_json_atomic(&path, &progress)?;
        }
        Ok(out)
    }

    // ── internal ───────────────────────────────────────────────────────

    fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        // A poisoned lock only means another thread panicked mid-write;
        // the files themselves are still consistent (rename is atomic).
        self.mutations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn assemble(&self, sidecar: AssetSidecar) -> Result<AssetRecord, StoreError> {
        let crops: CropsFile = read_json(&self.state_dir.join(CROPS_FILE))?.unwrap_or_default();
        let rects = crops.crops.get(&sidecar.asset_id);

        let mut derivatives = BTreeMap::new();
        for orientation in Orientation::ALL {
            let path = self.derivative_path(&sidecar.asset_id, orientation);
            let rect = rects.and_then(|per| per.get(&orientation)).copied();
            // A derivative entry exists iff a successful crop produced the
            // file; a stored rect without a file is just a saved parameter.
            if path.exists() {
                if let Some(crop_rect) = rect {
                    derivatives.insert(orientation, Derivative { path, crop_rect });
                }
            }
        }

        let completed = matches!(
            self.read_progress()?.get(&sidecar.asset_id),
            Some(ProcessingState::Completed)
        );
        let status = ProcessingState::derive(
            derivatives.contains_key(&Orientation::Portrait),
            derivatives.contains_key(&Orientation::Landscape),
            completed,
        );

        let local_original_path = sidecar.file_path.filter(|p| p.exists());
        Ok(AssetRecord {
            id: sidecar.asset_id,
            original_filename: sidecar.original_filename,
            local_original_path,
            derivatives,
            status,
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let data = match fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write-temp-then-rename so readers never observe a partial file and a
/// crash cannot lose an acknowledged mutation. Temp names carry a process
/// wide sequence number so two in-flight writes never share one.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    static TMP_SEQ: AtomicU64 = AtomicU64::new(0);
    let data = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension(format!("tmp{}", TMP_SEQ.fetch_add(1, Ordering::Relaxed)));
    {
        let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(&data).map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store(name: &str) -> SidecarStore {
        let dir = std::env::temp_dir().join("meural_sync_tests").join(name);
        let _ = fs::remove_dir_all(&dir);
        SidecarStore::open(dir.join("input"), dir.join("output"), dir.join("state")).unwrap()
    }

    fn rect(x: u32) -> CropRect {
        CropRect {
            x,
            y: 0,
            width: 800,
            height: 600,
        }
    }

    /// Simulate the external crop collaborator producing an output file.
    fn fake_crop(store: &SidecarStore, id: &str, orientation: Orientation, r: CropRect) {
        let scratch = store.state_dir().join(format!("{id}_{orientation}.scratch.jpg"));
        fs::write(&scratch, b"jpeg").unwrap();
        store.upsert_derivative(id, orientation, &scratch, r).unwrap();
    }

    #[test]
    fn get_unknown_is_none() {
        let store = test_store("get_unknown");
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn upsert_original_then_get() {
        let store = test_store("upsert_original");
        let original = store.input_dir().join("a1.jpg");
        fs::write(&original, b"bytes").unwrap();
        store.upsert_original("a1", "IMG_0001.jpg", &original).unwrap();

        let record = store.get("a1").unwrap().unwrap();
        assert_eq!(record.id, "a1");
        assert_eq!(record.original_filename, "IMG_0001.jpg");
        assert_eq!(record.local_original_path.as_deref(), Some(original.as_path()));
        assert!(record.derivatives.is_empty());
        assert_eq!(record.status, ProcessingState::Unprocessed);
    }

    #[test]
    fn derivative_appears_after_crop() {
        let store = test_store("derivative_after_crop");
        let original = store.input_dir().join("a1.jpg");
        fs::write(&original, b"bytes").unwrap();
        store.upsert_original("a1", "IMG_0001.jpg", &original).unwrap();

        fake_crop(&store, "a1", Orientation::Portrait, rect(10));
        let record = store.get("a1").unwrap().unwrap();
        assert_eq!(record.status, ProcessingState::Portrait);
        let d = &record.derivatives[&Orientation::Portrait];
        assert_eq!(d.crop_rect, rect(10));
        assert!(d.path.ends_with("portrait/a1_portrait.jpg"));
    }

    #[test]
    fn crop_rect_survives_derivative_deletion() {
        let store = test_store("rect_survival");
        let original = store.input_dir().join("a1.jpg");
        fs::write(&original, b"bytes").unwrap();
        store.upsert_original("a1", "IMG_0001.jpg", &original).unwrap();
        fake_crop(&store, "a1", Orientation::Portrait, rect(42));

        fs::remove_file(store.derivative_path("a1", Orientation::Portrait)).unwrap();

        // The derivative entry is gone, the stored rectangle is not.
        let record = store.get("a1").unwrap().unwrap();
        assert!(record.derivatives.is_empty());
        assert_eq!(
            store.crop_rect("a1", Orientation::Portrait).unwrap(),
            Some(rect(42))
        );
    }

    #[test]
    fn upsert_derivative_is_idempotent_overwrite() {
        let store = test_store("idempotent_overwrite");
        let original = store.input_dir().join("a1.jpg");
        fs::write(&original, b"bytes").unwrap();
        store.upsert_original("a1", "IMG_0001.jpg", &original).unwrap();
        fake_crop(&store, "a1", Orientation::Landscape, rect(1));
        fake_crop(&store, "a1", Orientation::Landscape, rect(2));

        let record = store.get("a1").unwrap().unwrap();
        assert_eq!(record.derivatives[&Orientation::Landscape].crop_rect, rect(2));
        assert_eq!(record.status, ProcessingState::Landscape);
    }

    #[test]
    fn remove_deletes_everything_and_is_noop_when_absent() {
        let store = test_store("remove_all");
        store.remove("ghost").unwrap(); // no-op

        let original = store.input_dir().join("a1.jpg");
        fs::write(&original, b"bytes").unwrap();
        store.upsert_original("a1", "IMG_0001.jpg", &original).unwrap();
        fake_crop(&store, "a1", Orientation::Portrait, rect(5));
        store
            .update_progress(|p| {
                p.insert("a1".into(), ProcessingState::Portrait);
            })
            .unwrap();

        store.remove("a1").unwrap();
        assert!(store.get("a1").unwrap().is_none());
        assert!(!store.derivative_path("a1", Orientation::Portrait).exists());
        assert_eq!(store.crop_rect("a1", Orientation::Portrait).unwrap(), None);
        assert!(store.read_progress().unwrap().is_empty());
        assert!(!original.exists());
    }

    #[test]
    fn list_all_enumerates_records() {
        let store = test_store("list_all");
        for id in ["b", "a", "c"] {
            let p = store.input_dir().join(format!("{id}.jpg"));
            fs::write(&p, b"x").unwrap();
            store.upsert_original(id, &format!("{id}.jpg"), &p).unwrap();
        }
        let ids: Vec<String> = store.list_all().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn completed_flag_dominates_status() {
        let store = test_store("completed_status");
        let original = store.input_dir().join("a1.jpg");
        fs::write(&original, b"bytes").unwrap();
        store.upsert_original("a1", "IMG_0001.jpg", &original).unwrap();
        store
            .update_progress(|p| {
                p.insert("a1".into(), ProcessingState::Completed);
            })
            .unwrap();

        let record = store.get("a1").unwrap().unwrap();
        assert_eq!(record.status, ProcessingState::Completed);
    }

    #[test]
    fn concurrent_progress_updates_all_persist() {
        let store = std::sync::Arc::new(test_store("concurrent_progress"));
        let ids: Vec<String> = (0..64).map(|i| format!("a{i}")).collect();

        std::thread::scope(|scope| {
            for chunk in ids.chunks(8) {
                let store = store.clone();
                scope.spawn(move || {
                    for id in chunk {
                        store
                            .update_progress(|p| {
                                p.insert(id.clone(), ProcessingState::Completed);
                            })
                            .unwrap();
                    }
                });
            }
        });

        let progress = store.read_progress().unwrap();
        for id in &ids {
            assert_eq!(progress.get(id), Some(&ProcessingState::Completed), "{id}");
        }
    }

    #[test]
    fn corrupt_sidecar_reports_path() {
        let store = test_store("corrupt");
        let path = store.input_dir().join(".metadata/bad.json");
        fs::write(&path, b"{not json").unwrap();
        let err = store.get("bad").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
