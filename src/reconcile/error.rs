use thiserror::Error;

/// Run-level failures: these abort a run before per-asset work begins.
/// Per-asset failures never surface here; they are collected into the
/// run report instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("run lock error: {0}")]
    Lock(String),

    #[error("remote listing failed: {0}")]
    Remote(String),
}
