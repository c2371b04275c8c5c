//! Advisory file lock for read-modify-write sequences
//!
//! The registry never locks implicitly. Writers that need `load; mutate; save`
//! to be atomic with respect to other writers hold a [`RegistryLock`] for the
//! whole sequence. The lock is an OS-level `flock`-style advisory lock, so it
//! serializes both separate processes and separate threads that open the lock
//! file independently. It is released when the guard is dropped, including on
//! error paths and panics.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use backoff::ExponentialBackoff;
use fs2::FileExt;
use std::time::Duration;

use crate::{Error, Result, RobustnessConfig};

/// Scoped exclusive lock on a `.lock` file.
#[derive(Debug)]
pub struct RegistryLock {
    file: File,
    path: PathBuf,
}

impl RegistryLock {
    /// Block until the exclusive lock on `path` is held.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;
        file.lock_exclusive().map_err(|source| Error::LockFailed {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Take the lock if it is free, returning `None` when another holder has it.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(source) => Err(Error::LockFailed {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Retry a contended lock with exponential backoff for at most
    /// `config.lock_timeout`.
    pub fn acquire_with(path: impl AsRef<Path>, config: RobustnessConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;

        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(250),
            max_elapsed_time: Some(config.lock_timeout),
            ..ExponentialBackoff::default()
        };

        let attempt = || match file.try_lock_exclusive() {
            Ok(()) => Ok(()),
            Err(e) if is_contended(&e) => Err(backoff::Error::transient(e)),
            Err(e) => Err(backoff::Error::permanent(e)),
        };

        match backoff::retry(policy, attempt) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "lock acquired");
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Err(backoff::Error::Transient { .. }) => Err(Error::LockTimeout {
                path: path.to_path_buf(),
                timeout: config.lock_timeout,
            }),
            Err(backoff::Error::Permanent(source)) => Err(Error::LockFailed {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
        } else {
            tracing::debug!(path = %self.path.display(), "lock released");
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::io(path, e))
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
