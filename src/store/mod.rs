//! Durable asset store backed by JSON sidecar records.
//!
//! Maps an AssetID to everything known about it locally: the downloaded
//! original, per-orientation cropped derivatives, per-orientation crop
//! rectangles, and processing progress. No database; every mutation is
//! an atomic write of a small JSON file, so the reconciler can treat the
//! store as ground truth for "what has been processed" across crashes.

pub mod error;
pub mod lock;
pub mod sidecar;
pub mod types;

pub use error::StoreError;
pub use lock::RunLock;
pub use sidecar::SidecarStore;
pub use types::{AssetRecord, CropRect, Derivative, ProcessingState};
