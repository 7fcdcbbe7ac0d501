//! Record types for the sidecar store.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::Orientation;

/// Crop rectangle in original-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A cropped output image for one orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
    pub path: PathBuf,
    pub crop_rect: CropRect,
}

/// How far an asset has progressed through cropping and publication.
///
/// `Completed` is sticky: once an asset has been published, re-cropping it
/// does not regress the state. Everything else is recomputed from which
/// derivatives exist, never asserted from event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Unprocessed,
    Portrait,
    Landscape,
    Both,
    Completed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Portrait => "portrait",
            Self::Landscape => "landscape",
            Self::Both => "both",
            Self::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unprocessed" => Some(Self::Unprocessed),
            "portrait" => Some(Self::Portrait),
            "landscape" => Some(Self::Landscape),
            "both" => Some(Self::Both),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Pure function from "which derivatives exist" plus the sticky
    /// completed flag to the asset's state.
    pub fn derive(has_portrait: bool, has_landscape: bool, completed: bool) -> Self {
        if completed {
            return Self::Completed;
        }
        match (has_portrait, has_landscape) {
            (true, true) => Self::Both,
            (true, false) => Self::Portrait,
            (false, true) => Self::Landscape,
            (false, false) => Self::Unprocessed,
        }
    }

    /// State after a successful crop for `orientation`.
    pub fn after_crop(self, orientation: Orientation) -> Self {
        match (self, orientation) {
            (Self::Completed, _) => Self::Completed,
            (Self::Both, _) => Self::Both,
            (Self::Unprocessed, Orientation::Portrait) => Self::Portrait,
            (Self::Unprocessed, Orientation::Landscape) => Self::Landscape,
            (Self::Portrait, Orientation::Portrait) => Self::Portrait,
            (Self::Portrait, Orientation::Landscape) => Self::Both,
            (Self::Landscape, Orientation::Landscape) => Self::Landscape,
            (Self::Landscape, Orientation::Portrait) => Self::Both,
        }
    }
}

/// Everything the store knows about one asset.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    /// Opaque identifier assigned by the photo library; the single join
    /// key across library, cache, and playlist. Never derived from a
    /// filename; filenames are derived from it.
    pub id: String,
    /// Filename as reported by the library, advisory only.
    pub original_filename: String,
    pub local_original_path: Option<PathBuf>,
    pub derivatives: BTreeMap<Orientation, Derivative>,
    pub status: ProcessingState,
}

/// On-disk shape of `.metadata/<assetID>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AssetSidecar {
    pub asset_id: String,
    #[serde(default)]
    pub original_filename: String,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

/// On-disk shape of `crops.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct CropsFile {
    #[serde(default)]
    pub crops: BTreeMap<String, BTreeMap<Orientation, CropRect>>,
}
