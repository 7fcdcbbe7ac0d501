//! Run outcome types, serializable for the CLI's JSON output.

use serde::Serialize;

/// What one reconciliation run actually did.
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    /// False when any per-asset operation failed or listing failed.
    pub success: bool,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
    /// Per-asset failures, as `"<assetID>: <message>"` strings.
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn finalize(mut self) -> Self {
        self.success = self.errors.is_empty();
        self
    }
}

/// A sync request either runs to completion or is refused because another
/// run holds the lock. Refusal is a normal outcome, not an error.
#[derive(Debug)]
pub enum SyncOutcome {
    Completed(SyncReport),
    AlreadyRunning,
}

#[derive(Debug, Default, Serialize)]
pub struct ComparisonCounts {
    pub in_library: usize,
    pub in_playlist: usize,
    pub missing_on_playlist: usize,
    pub only_on_playlist: usize,
}

/// Read-only view of library versus playlist membership.
#[derive(Debug, Default, Serialize)]
pub struct Comparison {
    pub in_library: Vec<String>,
    pub in_playlist: Vec<String>,
    pub missing_on_playlist: Vec<String>,
    pub only_on_playlist: Vec<String>,
    pub counts: ComparisonCounts,
}
