//! Best-effort EXIF extraction for display captions.
//!
//! Missing or unreadable EXIF is normal (screenshots, scans, edited
//! exports), so every field is optional and nothing here returns an error
//! for absent metadata.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use exif::{In, Tag, Value};

/// Caption-relevant metadata for one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMeta {
    pub camera: Option<String>,
    /// `DateTimeOriginal` as recorded, e.g. `2021-06-14 18:03:22`.
    pub taken_at: Option<String>,
    pub year: Option<u16>,
}

/// Read caption metadata from an image file. I/O failures and absent EXIF
/// both yield an empty `ImageMeta`.
pub fn read_image_meta(path: &Path) -> ImageMeta {
    match try_read(path) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::debug!(path = %path.display(), "No EXIF metadata: {e}");
            ImageMeta::default()
        }
    }
}

fn try_read(path: &Path) -> Result<ImageMeta, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader)?;

    let taken_at = exif
        .get_field(Tag::DateTimeOriginal, In::PRIMARY)
        .map(|f| normalize_datetime(&f.display_value().to_string()));
    let year = taken_at.as_deref().and_then(|dt| dt.get(..4)?.parse().ok());

    let make = ascii_field(&exif, Tag::Make);
    let model = ascii_field(&exif, Tag::Model);
    // Model strings usually repeat the make ("Canon Canon EOS R5").
    let camera = match (make, model) {
        (Some(make), Some(model)) if model.starts_with(&make) => Some(model),
        (Some(make), Some(model)) => Some(format!("{make} {model}")),
        (None, Some(model)) => Some(model),
        (Some(make), None) => Some(make),
        (None, None) => None,
    };

    Ok(ImageMeta {
        camera,
        taken_at,
        year,
    })
}

fn ascii_field(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(chunks) => {
            let raw: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
            let s = String::from_utf8_lossy(&raw).trim().to_string();
            (!s.is_empty()).then_some(s)
        }
        _ => None,
    }
}

/// EXIF datetimes use `:` as the date separator; captions read better with
/// dashes, and four leading digits make the year extractable either way.
fn normalize_datetime(raw: &str) -> String {
    let raw = raw.trim();
    match raw.split_once(' ') {
        Some((date, time)) => format!("{} {}", date.replace(':', "-"), time),
        None => raw.replace(':', "-"),
    }
}
