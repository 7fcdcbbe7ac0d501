//! Advisory cross-process run lock.
//!
//! One reconciliation run at a time, enforced with an OS file lock on
//! `state/sync.lock`. Acquisition never blocks: a held lock is reported
//! immediately so the caller can surface "already in progress" instead
//! of queueing. The OS releases the lock when the holder exits, so a
//! crashed run cannot wedge future runs.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs4::FileExt as _;

use super::error::StoreError;

const LOCK_FILE: &str = "sync.lock";

/// Held for the duration of one run; dropping it releases the lock.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    /// Try to take the lock without blocking. `Ok(None)` means another
    /// process (or another task in this process) currently holds it.
    pub fn try_acquire(state_dir: &Path) -> Result<Option<Self>, StoreError> {
        let path = state_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.raw_os_error() == fs4::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn lock_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("meural_sync_tests").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn second_acquire_while_held_returns_none() {
        let dir = lock_dir("lock_contention");
        let held = RunLock::try_acquire(&dir).unwrap();
        assert!(held.is_some());
        assert!(RunLock::try_acquire(&dir).unwrap().is_none());
    }

    #[test]
    fn released_on_drop() {
        let dir = lock_dir("lock_release");
        drop(RunLock::try_acquire(&dir).unwrap());
        assert!(RunLock::try_acquire(&dir).unwrap().is_some());
    }
}
