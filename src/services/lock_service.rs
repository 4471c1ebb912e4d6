//! Cross-process gate for the offload scheduler.
//!
//! Only the process holding the lock may run periodic offload cycles. The
//! default backing is an advisory `flock`-style lock on a fixed file, which
//! the OS drops when the owning process exits, crash included.

use fs4::FileExt;
use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Mutex,
};
use thiserror::Error;
use tracing::{debug, info};

/// Lock file name under the system temp directory.
pub const DEFAULT_LOCK_FILE: &str = "scheduler.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// This call took the lock.
    Acquired,
    /// This process already owned the lock; nothing changed.
    AlreadyHeld,
    /// Another live process owns the lock.
    Contended,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("cannot open lock file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("cannot lock {path}: {source}")]
    Lock { path: PathBuf, source: io::Error },
    #[error("cannot unlock {path}: {source}")]
    Unlock { path: PathBuf, source: io::Error },
}

/// Process-exclusive lock. Implementations must never block in `try_acquire`.
pub trait ProcessLock: Send + Sync {
    fn try_acquire(&self) -> Result<LockStatus, LockError>;

    /// Release the lock if held. Returns whether anything was released.
    fn release(&self) -> Result<bool, LockError>;

    fn is_held(&self) -> bool;
}

pub fn default_lock_path() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_LOCK_FILE)
}

/// Advisory file lock. The open handle is kept for as long as the lock is
/// held; dropping the `FileLock` closes it and lets the OS release the lock.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    held: Mutex<Option<File>>,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<File, LockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LockError::Open {
                path: self.path.clone(),
                source,
            })?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|source| LockError::Open {
                path: self.path.clone(),
                source,
            })
    }
}

impl ProcessLock for FileLock {
    fn try_acquire(&self) -> Result<LockStatus, LockError> {
        let mut held = self.held.lock().unwrap_or_else(|poison| poison.into_inner());
        if held.is_some() {
            debug!(path = %self.path.display(), "offload lock already held by this process");
            return Ok(LockStatus::AlreadyHeld);
        }

        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                info!(path = %self.path.display(), pid = std::process::id(), "acquired offload lock");
                *held = Some(file);
                Ok(LockStatus::Acquired)
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                info!(path = %self.path.display(), "offload lock held by another process");
                Ok(LockStatus::Contended)
            }
            Err(source) => Err(LockError::Lock {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn release(&self) -> Result<bool, LockError> {
        let mut held = self.held.lock().unwrap_or_else(|poison| poison.into_inner());
        let Some(file) = held.take() else {
            return Ok(false);
        };
        FileExt::unlock(&file).map_err(|source| LockError::Unlock {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), "released offload lock");
        Ok(true)
    }

    fn is_held(&self) -> bool {
        self.held
            .lock()
            .map(|held| held.is_some())
            .unwrap_or(false)
    }
}
