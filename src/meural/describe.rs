//! AssetID carriage inside playlist item descriptions.
//!
//! The display API has no custom-field support, so the link from a
//! playlist item back to its library asset is smuggled as the LAST
//! non-blank line of the free-text description. The human-readable
//! caption occupies the lines above, separated by a blank line. Anything
//! that does not parse as an id is treated as absent: such items are
//! invisible to reconciliation and must never be modified or removed.

use crate::exifmeta::ImageMeta;

/// Extract the AssetID from an item description, if one is present.
///
/// The candidate is the last non-blank line, trimmed. It counts as an id
/// only when it is entirely ASCII alphanumerics and dashes; captions
/// ending in an ordinary sentence therefore never parse as ids.
pub fn asset_id_from_description(description: &str) -> Option<&str> {
    let line = description.lines().rev().find_map(|l| {
        let t = l.trim();
        (!t.is_empty()).then_some(t)
    })?;
    let valid = line
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-');
    (valid && !line.is_empty()).then_some(line)
}

/// Compose a description: human caption lines, a blank separator, and the
/// AssetID as the final line.
pub fn build_description(meta: &ImageMeta, asset_id: &str) -> String {
    let mut lines = Vec::new();
    if let Some(taken_at) = &meta.taken_at {
        lines.push(format!("Taken {taken_at}"));
    }
    if let Some(camera) = &meta.camera {
        lines.push(camera.clone());
    }
    let caption = lines.join("\n");
    if caption.is_empty() {
        asset_id.to_string()
    } else {
        format!("{caption}\n\n{asset_id}")
    }
}

/// Whether two descriptions agree on their caption content, ignoring the
/// trailing id line and surrounding blank lines. Used to decide if an
/// item needs a metadata update.
pub fn descriptions_equivalent(a: &str, b: &str) -> bool {
    caption_of(a) == caption_of(b)
}

fn caption_of(description: &str) -> Vec<&str> {
    let lines: Vec<&str> = description.lines().map(str::trim).collect();
    let mut end = lines.len();
    // Drop trailing blanks, then the id line if present, then blanks again.
    while end > 0 && lines[end - 1].is_empty() {
        end -= 1;
    }
    if end > 0 && asset_id_from_description(lines[end - 1]).is_some() {
        end -= 1;
    }
    while end > 0 && lines[end - 1].is_empty() {
        end -= 1;
    }
    lines[..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_from_last_line() {
        let d = "Taken 2021-06-14 18:03:22\nCanon EOS R5\n\na1b2-c3d4";
        assert_eq!(asset_id_from_description(d), Some("a1b2-c3d4"));
    }

    #[test]
    fn bare_id_description() {
        assert_eq!(asset_id_from_description("a1"), Some("a1"));
    }

    #[test]
    fn trailing_blank_lines_are_skipped() {
        assert_eq!(asset_id_from_description("caption\n\na1\n\n  \n"), Some("a1"));
    }

    #[test]
    fn human_text_never_parses_as_id() {
        assert_eq!(asset_id_from_description("A lovely sunset."), None);
        assert_eq!(asset_id_from_description("Summer trip 2021!"), None);
        assert_eq!(asset_id_from_description(""), None);
        assert_eq!(asset_id_from_description("   \n \n"), None);
    }

    #[test]
    fn uuid_style_ids_parse() {
        let d = "caption\n\n01890f2e-7a3b-4d6c-9e1f-2a3b4c5d6e7f";
        assert_eq!(
            asset_id_from_description(d),
            Some("01890f2e-7a3b-4d6c-9e1f-2a3b4c5d6e7f")
        );
    }

    #[test]
    fn build_then_extract_round_trips() {
        let meta = ImageMeta {
            camera: Some("Canon EOS R5".into()),
            taken_at: Some("2021-06-14 18:03:22".into()),
            year: Some(2021),
        };
        let d = build_description(&meta, "a1");
        assert_eq!(asset_id_from_description(&d), Some("a1"));
        assert!(d.starts_with("Taken 2021-06-14 18:03:22\nCanon EOS R5"));
    }

    #[test]
    fn empty_meta_builds_bare_id() {
        let d = build_description(&ImageMeta::default(), "a1");
        assert_eq!(d, "a1");
        assert_eq!(asset_id_from_description(&d), Some("a1"));
    }

    #[test]
    fn equivalence_ignores_id_line_and_blanks() {
        let a = "Taken 2021-06-14\nCanon\n\na1";
        let b = "Taken 2021-06-14\nCanon\n\ndifferent-id\n";
        let c = "Taken 2022-01-01\nCanon\n\na1";
        assert!(descriptions_equivalent(a, b));
        assert!(!descriptions_equivalent(a, c));
    }

    #[test]
    fn bare_ids_are_equivalent_regardless_of_id() {
        assert!(descriptions_equivalent("a1", "a2"));
    }
}
