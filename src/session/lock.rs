// src/session/lock.rs

//! Exclusive lock held for the lifetime of a session

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest single wait between attempts
const MAX_BACKOFF: Duration = Duration::from_millis(1600);

#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    /// Take the lock at `path`, retrying with exponential backoff
    ///
    /// Waits 100ms, 200ms, 400ms... between attempts until `timeout` has
    /// passed.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| {
                Error::LockError(format!("Cannot open lock file {}: {}", path.display(), e))
            })?;

        let start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Acquired session lock {}", path.display());
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        return Err(Error::LockError(format!(
                            "Failed to acquire session lock {} after {} attempts. \
                             Another session may be running on this target. Error: {}",
                            path.display(),
                            attempt + 1,
                            e
                        )));
                    }
                    let delay = Duration::from_millis(100 * (1 << attempt.min(4)))
                        .min(MAX_BACKOFF)
                        .min(timeout - elapsed);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
