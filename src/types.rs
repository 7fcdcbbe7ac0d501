use serde::{Deserialize, Serialize};

/// Target aspect ratio of a cropped derivative.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub const ALL: [Orientation; 2] = [Orientation::Portrait, Orientation::Landscape];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portrait => "portrait",
            Self::Landscape => "landscape",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "portrait" => Some(Self::Portrait),
            "landscape" => Some(Self::Landscape),
            _ => None,
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Canonical name for a processed derivative: `<assetID>_<orientation>.jpg`.
///
/// Both the "already processed, replace don't duplicate" check and the
/// playlist description matching depend on this convention.
pub fn derivative_filename(asset_id: &str, orientation: Orientation) -> String {
    format!("{asset_id}_{orientation}.jpg")
}

/// Parse a processed-asset filename back into (AssetID, orientation).
///
/// The portion before the first `_` is the AssetID; the rest must be
/// `<orientation>.<ext>`. Returns `None` for anything else so that
/// unrelated files in the output album are simply ignored.
pub fn parse_derivative_filename(filename: &str) -> Option<(&str, Orientation)> {
    let (id, rest) = filename.split_once('_')?;
    if id.is_empty() {
        return None;
    }
    let (orientation, ext) = rest.split_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Orientation::from_str(orientation).map(|o| (id, o))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_round_trip() {
        for o in Orientation::ALL {
            assert_eq!(Orientation::from_str(o.as_str()), Some(o));
        }
    }

    #[test]
    fn derivative_filename_format() {
        assert_eq!(
            derivative_filename("abc-123", Orientation::Portrait),
            "abc-123_portrait.jpg"
        );
    }

    #[test]
    fn parse_derivative_round_trip() {
        let name = derivative_filename("A2", Orientation::Landscape);
        assert_eq!(
            parse_derivative_filename(&name),
            Some(("A2", Orientation::Landscape))
        );
    }

    #[test]
    fn parse_derivative_rejects_unrelated_names() {
        assert_eq!(parse_derivative_filename("IMG_0001.jpg"), None);
        assert_eq!(parse_derivative_filename("photo.jpg"), None);
        assert_eq!(parse_derivative_filename("_portrait.jpg"), None);
        assert_eq!(parse_derivative_filename("a_portrait"), None);
        assert_eq!(parse_derivative_filename("a_portrait."), None);
    }

    #[test]
    fn parse_derivative_takes_first_underscore() {
        // An id never contains '_'; a name with extra underscores is not ours.
        assert_eq!(parse_derivative_filename("a_b_portrait.jpg"), None);
    }
}
