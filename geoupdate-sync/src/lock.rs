//! Process-level exclusive lock over a file path.
//!
//! Only one update run may operate on a database directory at a time. The
//! lock is non-blocking: a second run fails with [`LockError::Held`] instead
//! of queueing behind the first.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use crate::error::LockError;

/// An acquired exclusive lock. Released by [`ProcessLock::release`] or on drop.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    file: Option<File>,
}

impl ProcessLock {
    /// Take the lock at `path`, creating the file and its parent directories.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(LockError::Held {
                    path: path.to_path_buf(),
                })
            }
            Err(TryLockError::Error(source)) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }

        tracing::debug!("acquired lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Release the lock. Calling this more than once is a no-op.
    pub fn release(&mut self) -> Result<(), LockError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        file.unlock().map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!("released lock {}", self.path.display());
        Ok(())
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!("failed to release lock: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_while_held() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".lock");

        let _held = ProcessLock::acquire(&path).unwrap();
        let err = ProcessLock::acquire(&path).unwrap_err();
        assert!(matches!(err, LockError::Held { .. }), "got: {err}");
        assert!(err.to_string().contains(".lock"));
    }

    #[test]
    fn release_allows_reacquire_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".lock");

        let mut lock = ProcessLock::acquire(&path).unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
        assert!(!lock.is_held());

        let again = ProcessLock::acquire(&path).unwrap();
        assert!(again.is_held());
    }

    #[test]
    fn drop_releases_lock() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".lock");

        {
            let _lock = ProcessLock::acquire(&path).unwrap();
        }
        ProcessLock::acquire(&path).expect("lock should be free after drop");
    }

    #[test]
    fn creates_missing_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("var").join("run").join("geoupdate.lock");

        let lock = ProcessLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path.as_path());
    }
}
