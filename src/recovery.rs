//! One-slot durable record of a conversion whose status commit failed.
//!
//! The marker file holds a single job id. Writing a new id replaces the old
//! one, so only the most recent failed commit survives a crash.

use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default marker file name inside the working directory
pub const MARKER_FILE: &str = ".bak";

/// What the marker currently remembers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryState {
    None,
    PendingCommit(String),
}

#[derive(Debug, Clone)]
pub struct RecoveryMarker {
    path: PathBuf,
}

impl RecoveryMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker at the default location in `work_dir`
    pub fn in_dir(work_dir: &Path) -> Self {
        Self::new(work_dir.join(MARKER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `id`, replacing any previous value
    pub fn write(&self, id: &str) -> io::Result<()> {
        std::fs::write(&self.path, id)
    }

    /// The remembered id; an empty or unreadable marker counts as absent
    pub fn read(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => content
                .lines()
                .next()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read recovery marker {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn state(&self) -> RecoveryState {
        match self.read() {
            Some(id) => RecoveryState::PendingCommit(id),
            None => RecoveryState::None,
        }
    }

    /// Delete the marker; a missing marker is fine
    pub fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
