//! Job queue backed by the upload table.
//!
//! The daemon is the only writer of job status, so claiming a job is just
//! reading the oldest eligible row; nothing is locked in the store.

pub mod sqlite;

pub use sqlite::SqliteJobStore;

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Extension of every converted file
pub const PLAY_EXTENSION: &str = "flv";

/// Persisted status of an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Waiting for conversion
    Uploaded,
    /// Converted, `play_path` is set
    Playable,
    /// Kept as uploaded because the format is not converted here
    AcceptedNoConvert,
}

impl JobStatus {
    /// Single-letter code stored in `file_status`
    pub fn code(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "C",
            JobStatus::Playable => "P",
            JobStatus::AcceptedNoConvert => "A",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "C" => Some(JobStatus::Uploaded),
            "P" => Some(JobStatus::Playable),
            "A" => Some(JobStatus::AcceptedNoConvert),
            _ => None,
        }
    }
}

/// One uploaded video
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub storage_root: String,
    /// Relative to `storage_root`, with extension
    pub save_path: String,
    pub play_path: Option<String>,
    /// Storage location the host filter is matched against
    pub context_path: String,
    pub status: JobStatus,
    /// Only used for logging; rows with an unreadable time still convert
    pub upload_time: Option<DateTime<Utc>>,
}

impl Job {
    pub fn source_path(&self) -> PathBuf {
        PathBuf::from(format!("{}{}", self.storage_root, self.save_path))
    }

    /// Relative path the converted file is written to
    pub fn target_play_path(&self) -> String {
        play_path_for(&self.save_path)
    }

    pub fn destination_path(&self) -> PathBuf {
        PathBuf::from(format!("{}{}", self.storage_root, self.target_play_path()))
    }

    /// Whether the source already has the output extension
    pub fn is_already_playable_format(&self) -> bool {
        self.save_path == self.target_play_path()
    }
}

/// Replace the file extension of `save_path` with `.flv`.
///
/// Only the last path component is considered; a name without an extension
/// gets `.flv` appended.
pub fn play_path_for(save_path: &str) -> String {
    let name_start = save_path.rfind(['/', '\\']).map_or(0, |i| i + 1);
    let stem_end = save_path[name_start..]
        .rfind('.')
        .map_or(save_path.len(), |i| name_start + i);
    format!("{}.{}", &save_path[..stem_end], PLAY_EXTENSION)
}

/// Operations the worker needs from the job queue.
///
/// Each call is independent: implementations must not keep a connection
/// open between calls.
pub trait JobStore {
    /// Oldest `Uploaded` job whose context path contains `host_filter`
    fn claim_next(&self, host_filter: &str) -> Result<Option<Job>, StoreError>;

    /// The job `id`, only if it is still `Uploaded` and matches `host_filter`
    fn lookup_converted(&self, host_filter: &str, id: &str) -> Result<Option<Job>, StoreError>;

    /// Set `Playable` and record where the converted file lives
    fn mark_playable(&self, id: &str, play_path: &str) -> Result<(), StoreError>;

    fn mark_accepted_no_convert(&self, id: &str) -> Result<(), StoreError>;
}
