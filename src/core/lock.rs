//! Per-base build locks
//!
//! A base is never built twice at the same time. Inside one process the
//! held bases are tracked in a set; across processes each held base also
//! holds an exclusive `flock` on `locks/<base>.lock`. Both are released when
//! the [`BuildLock`] guard is dropped.

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::defaults::LOCK_POLL_INTERVAL_MS;
use crate::error::BuildError;

/// What to do when a base is already being built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockPolicy {
    /// Wait until the other build finishes
    #[default]
    Wait,
    /// Fail the base immediately
    Reject,
}

/// Registry of held build locks
#[derive(Debug)]
pub struct BuildLocks {
    dir: PathBuf,
    active: Mutex<HashSet<String>>,
    released: Notify,
}

impl BuildLocks {
    /// Create a registry keeping lock files in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.into(),
            active: Mutex::new(HashSet::new()),
            released: Notify::new(),
        })
    }

    /// Check if this process holds the lock of `base`
    pub fn is_held(&self, base: &str) -> bool {
        self.active.lock().contains(base)
    }

    /// Try to take the lock of `base` without waiting
    pub fn try_acquire(self: &Arc<Self>, base: &str) -> Result<Option<BuildLock>, BuildError> {
        let mut active = self.active.lock();
        if active.contains(base) {
            return Ok(None);
        }

        let path = self.dir.join(format!("{base}.lock"));
        let file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                active.insert(base.to_string());
                tracing::debug!("Acquired build lock for '{}'", base);
                Ok(Some(BuildLock {
                    base: base.to_string(),
                    file,
                    locks: Arc::clone(self),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tracing::debug!("Build lock for '{}' held by another process", base);
                Ok(None)
            }
            Err(e) => Err(BuildError::Io {
                path,
                error: e.to_string(),
            }),
        }
    }

    /// Take the lock of `base` according to `policy`
    ///
    /// With [`LockPolicy::Wait`] this waits for a release in this process or
    /// polls the lock file held by another one, until `cancel` fires.
    pub async fn acquire(
        self: &Arc<Self>,
        base: &str,
        policy: LockPolicy,
        cancel: &CancellationToken,
    ) -> Result<BuildLock, BuildError> {
        let mut announced = false;
        loop {
            let released = self.released.notified();
            if let Some(lock) = self.try_acquire(base)? {
                return Ok(lock);
            }
            if policy == LockPolicy::Reject {
                return Err(BuildError::Locked {
                    base: base.to_string(),
                });
            }
            if !announced {
                tracing::info!("Waiting for running build of '{}' to finish", base);
                announced = true;
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(BuildError::Cancelled { base: base.to_string() });
                }
                () = released => {}
                () = tokio::time::sleep(Duration::from_millis(LOCK_POLL_INTERVAL_MS)) => {}
            }
        }
    }

    fn release(&self, base: &str) {
        self.active.lock().remove(base);
        self.released.notify_waiters();
        tracing::debug!("Released build lock for '{}'", base);
    }
}

fn open_lock_file(path: &Path) -> Result<File, BuildError> {
    let io_error = |e: std::io::Error| BuildError::Io {
        path: path.to_path_buf(),
        error: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(io_error)
}

/// Held build lock of one base
#[derive(Debug)]
pub struct BuildLock {
    base: String,
    file: File,
    locks: Arc<BuildLocks>,
}

impl BuildLock {
    /// Locked base
    pub fn base(&self) -> &str {
        &self.base
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        self.locks.release(&self.base);
    }
}
