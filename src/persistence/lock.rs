//! Advisory file locks shared between independent `rushd` processes.
//!
//! Every registry or notification operation takes one [`StoreLock`] for its
//! whole read-modify-write cycle and drops it before returning. Locks are
//! never held across operations.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use fs2::FileExt;
use tracing::warn;

use crate::{AppError, Result};

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of concurrent readers.
    Shared,
    /// A single writer.
    Exclusive,
}

/// Guard over an advisory lock on a sidecar lock file.
///
/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
}

impl StoreLock {
    /// Block until the lock on `lock_path` is acquired in `mode`.
    ///
    /// Creates the lock file and its parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the lock file cannot be opened or
    /// the lock cannot be acquired.
    pub fn acquire(lock_path: &Path, mode: LockMode) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Persistence(format!(
                    "failed to create state directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|err| {
                AppError::Persistence(format!(
                    "failed to open lock file {}: {err}",
                    lock_path.display()
                ))
            })?;

        let locked = match mode {
            LockMode::Shared => FileExt::lock_shared(&file),
            LockMode::Exclusive => FileExt::lock_exclusive(&file),
        };
        locked.map_err(|err| AppError::Persistence(format!("failed to acquire lock: {err}")))?;

        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(%err, "failed to release store lock");
        }
    }
}
