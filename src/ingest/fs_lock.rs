//! Filesystem-based locking for cross-process coordination
//!
//! One lock file per repository id serializes ingestion runs of the same repository,
//! including runs in different processes. The OS releases the lock if the holder dies.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Guard that holds an exclusive filesystem lock
///
/// The lock is released when this guard is dropped. The lock file itself is left in
/// place and reused by later runs.
pub struct FsLockGuard {
    _file: File,
    path: PathBuf,
}

impl FsLockGuard {
    /// Try to acquire the lock at `lock_path` without waiting
    ///
    /// Returns `Ok(None)` if another holder has it.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).context("Failed to create lock directory")?;
        }

        let file = File::create(lock_path).context("Failed to create lock file")?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!("Acquired filesystem lock {:?}", lock_path);
                Ok(Some(Self {
                    _file: file,
                    path: lock_path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tracing::debug!("Filesystem lock {:?} is held elsewhere", lock_path);
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to acquire filesystem lock"),
        }
    }

    /// Poll for the lock until it is acquired or `timeout` expires (`Ok(None)`)
    pub fn acquire_blocking(lock_path: &Path, timeout: Duration) -> Result<Option<Self>> {
        let start = Instant::now();

        loop {
            if let Some(guard) = Self::try_acquire(lock_path)? {
                if start.elapsed() > POLL_INTERVAL {
                    tracing::info!("Acquired filesystem lock after {:?}", start.elapsed());
                }
                return Ok(Some(guard));
            }

            if start.elapsed() >= timeout {
                tracing::warn!(
                    "Timeout waiting for filesystem lock {:?} after {:?}",
                    lock_path,
                    timeout
                );
                return Ok(None);
            }

            if start.elapsed() < POLL_INTERVAL {
                tracing::info!(
                    "Another ingestion holds {:?}, waiting up to {:?}",
                    lock_path,
                    timeout
                );
            }
            std::thread::sleep(POLL_INTERVAL.min(timeout.saturating_sub(start.elapsed())));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FsLockGuard {
    fn drop(&mut self) {
        tracing::debug!("Releasing filesystem lock {:?}", self.path);
    }
}
