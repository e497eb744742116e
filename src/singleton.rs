//! Single-instance enforcement through an advisory lock on a file.
//!
//! The lock belongs to the open file, so the kernel drops it whenever the
//! process ends, however it ends. The lock file itself is never removed; an
//! unlocked leftover file does not block the next start.

use crate::error::LockError;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default lock file name inside the working directory
pub const LOCK_FILE: &str = ".lock";

/// Held for as long as the daemon runs
#[derive(Debug)]
pub struct SingletonGuard {
    path: PathBuf,
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl SingletonGuard {
    /// Take the exclusive lock on `path` without blocking
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let guard = Self::lock(path, file)?;
        debug!("Acquired instance lock {}", path.display());
        Ok(guard)
    }

    /// Lock at the default location in `work_dir`
    pub fn acquire_in(work_dir: &Path) -> Result<Self, LockError> {
        Self::acquire(&work_dir.join(LOCK_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn lock(path: &Path, file: File) -> Result<Self, LockError> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Self {
                path: path.to_path_buf(),
                _lock: lock,
            }),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Err(LockError::AlreadyRunning),
            Err((_, errno)) => Err(LockError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::from(errno),
            }),
        }
    }

    #[cfg(not(unix))]
    fn lock(path: &Path, file: File) -> Result<Self, LockError> {
        tracing::warn!("Single-instance lock is not enforced on this platform");
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }
}
