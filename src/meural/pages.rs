//! Playlist item listing across the API's response shapes.
//!
//! The endpoint has shipped three body layouts over time: a bare item
//! array, `{"data": [...]}` without paging, and `{"data": [...], "meta":
//! {"totalPages": N}}`. Listing handles all three so a firmware or API
//! rollout does not break reconciliation.

use serde_json::Value;

use super::error::DisplayError;

/// One playlist entry as the reconciler sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistItem {
    pub item_id: u64,
    pub description: String,
}

/// One page of playlist items plus what we know about further pages.
#[derive(Debug)]
pub enum ItemsPage {
    /// Unpaged response; this is everything.
    Flat(Vec<PlaylistItem>),
    Paged {
        items: Vec<PlaylistItem>,
        page: u32,
        total_pages: u32,
    },
}

impl ItemsPage {
    /// Interpret a response body fetched as page `page`.
    pub fn parse(body: &Value, page: u32, endpoint: &str) -> Result<Self, DisplayError> {
        let malformed = |detail: String| DisplayError::MalformedResponse {
            endpoint: endpoint.to_string(),
            detail,
        };

        if let Some(array) = body.as_array() {
            return Ok(Self::Flat(parse_items(array, endpoint)?));
        }

        let data = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("expected an item array or a data field".to_string()))?;
        let items = parse_items(data, endpoint)?;

        match body.pointer("/meta/totalPages").and_then(Value::as_u64) {
            Some(total_pages) => Ok(Self::Paged {
                items,
                page,
                total_pages: total_pages as u32,
            }),
            None => Ok(Self::Flat(items)),
        }
    }

    pub fn into_items(self) -> Vec<PlaylistItem> {
        match self {
            Self::Flat(items) | Self::Paged { items, .. } => items,
        }
    }

    /// The next page to fetch, if any.
    pub fn next_page(&self) -> Option<u32> {
        match self {
            Self::Flat(_) => None,
            Self::Paged {
                page, total_pages, ..
            } => (*page < *total_pages).then(|| page + 1),
        }
    }
}

fn parse_items(array: &[Value], endpoint: &str) -> Result<Vec<PlaylistItem>, DisplayError> {
    array
        .iter()
        .map(|item| {
            let item_id = item
                .get("id")
                .and_then(Value::as_u64)
                .ok_or_else(|| DisplayError::MalformedResponse {
                    endpoint: endpoint.to_string(),
                    detail: "playlist item without numeric id".to_string(),
                })?;
            let description = item
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(PlaylistItem {
                item_id,
                description,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_array() {
        let body = json!([
            {"id": 10, "description": "a1"},
            {"id": 11, "description": "a2"}
        ]);
        let page = ItemsPage::parse(&body, 1, "/items").unwrap();
        assert!(page.next_page().is_none());
        assert_eq!(page.into_items().len(), 2);
    }

    #[test]
    fn parses_unpaged_data_envelope() {
        let body = json!({"data": [{"id": 10, "description": "a1"}]});
        let page = ItemsPage::parse(&body, 1, "/items").unwrap();
        assert!(page.next_page().is_none());
    }

    #[test]
    fn parses_paged_envelope_and_walks_pages() {
        let body = json!({
            "data": [{"id": 10, "description": "a1"}],
            "meta": {"totalPages": 3}
        });
        let page = ItemsPage::parse(&body, 1, "/items").unwrap();
        assert_eq!(page.next_page(), Some(2));

        let last = ItemsPage::parse(&body, 3, "/items").unwrap();
        assert_eq!(last.next_page(), None);
    }

    #[test]
    fn missing_description_is_empty_not_error() {
        let body = json!([{"id": 10}]);
        let items = ItemsPage::parse(&body, 1, "/items").unwrap().into_items();
        assert_eq!(items[0].description, "");
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let body = json!({"items": []});
        assert!(matches!(
            ItemsPage::parse(&body, 1, "/items"),
            Err(DisplayError::MalformedResponse { .. })
        ));
    }
}
