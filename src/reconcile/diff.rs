//! Set difference between library and playlist membership.

use std::collections::BTreeSet;

/// Work implied by one comparison of library contents against playlist
/// contents, keyed by AssetID. The three sets are pairwise disjoint, which
/// is what lets the apply phases run without coordinating per id.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Diff {
    /// In the library but not on the playlist.
    pub to_add: Vec<String>,
    /// On the playlist but no longer in the library.
    pub to_remove: Vec<String>,
    /// Present on both sides; candidates for metadata refresh.
    pub to_update: Vec<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }
}

pub fn diff(library: &BTreeSet<String>, playlist: &BTreeSet<String>) -> Diff {
    Diff {
        to_add: library.difference(playlist).cloned().collect(),
        to_remove: playlist.difference(library).cloned().collect(),
        to_update: library.intersection(playlist).cloned().collect(),
    }
}
