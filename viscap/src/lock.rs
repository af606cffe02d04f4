//! Advisory lock files marking a capture file as actively written.
//!
//! A lock is a sibling file `.<basename>.lock` containing the writer's
//! process id, created before the first data write and removed when the
//! capture file closes. It is purely advisory: nothing enforces mutual
//! exclusion, it only signals writer ownership to humans and external
//! tooling inspecting the acquisition directory. Concurrent writers on the
//! same file are an external invariant the engine documents but does not
//! police.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FileIoError, Result};

/// Scoped advisory lock for one capture file.
///
/// Dropping the guard removes the lock file on every exit path; declare it
/// after the file handle it guards so the data is flushed before the lock
/// disappears.
#[derive(Debug)]
pub struct LockGuard {
    lock_path: PathBuf,
}

impl LockGuard {
    /// Creates the lock file next to `data_path`, before any data write.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError::Create`] if the lock file cannot be written.
    pub fn acquire(data_path: &Path) -> Result<Self> {
        let base = data_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let lock_path = data_path.with_file_name(format!(".{base}.lock"));

        fs::write(&lock_path, format!("{}\n", std::process::id())).map_err(|e| {
            FileIoError::Create {
                path: lock_path.display().to_string(),
                source: e,
            }
        })?;

        Ok(Self { lock_path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            tracing::warn!(
                lock = %self.lock_path.display(),
                error = %e,
                "failed to remove lock file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("00000000_0000.vis");

        let guard = LockGuard::acquire(&data_path).unwrap();
        let lock_path = guard.path().to_path_buf();
        assert_eq!(
            lock_path.file_name().unwrap().to_str().unwrap(),
            ".00000000_0000.vis.lock"
        );
        assert!(lock_path.exists());

        // Contains this process's pid.
        let contents = fs::read_to_string(&lock_path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());

        drop(guard);
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_drop_tolerates_missing_lock() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("gone.vis");

        let guard = LockGuard::acquire(&data_path).unwrap();
        fs::remove_file(guard.path()).unwrap();
        // Drop must not panic even though the file is already gone.
        drop(guard);
    }
}
