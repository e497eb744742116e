use super::{Job, JobStatus, JobStore};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const JOB_COLUMNS: &str = "file_id, file_storage_root, file_save_path, file_play_path,
     file_context_path, file_status, file_upload_time";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS file_upload_info (
    file_id           TEXT PRIMARY KEY,
    file_storage_root TEXT NOT NULL,
    file_save_path    TEXT NOT NULL,
    file_play_path    TEXT,
    file_context_path TEXT NOT NULL,
    file_status       TEXT NOT NULL,
    file_upload_time  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_file_upload_status_time
    ON file_upload_info (file_status, file_upload_time);
";

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = value.as_str()?;
        JobStatus::from_code(code)
            .ok_or_else(|| FromSqlError::Other(format!("unknown file_status {:?}", code).into()))
    }
}

/// Job store on a SQLite database file.
///
/// Every operation opens its own connection and drops it before returning,
/// so nothing is held open while the worker sleeps.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the table if the database is new
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = Connection::open(&self.path).map_err(StoreError::Connect)?;
        conn.execute_batch(SCHEMA).map_err(StoreError::Query)?;
        Ok(())
    }

    /// Open and close a connection once
    pub fn check_connection(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(StoreError::Query)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        if !self.path.exists() {
            return Err(StoreError::Unavailable(format!(
                "database file {} not found",
                self.path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(StoreError::Connect)?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(StoreError::Connect)?;
        Ok(conn)
    }

    fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        play_path: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.connect()?;
        let changed = match play_path {
            Some(play_path) => conn.execute(
                "UPDATE file_upload_info SET file_play_path = ?1, file_status = ?2
                 WHERE file_id = ?3",
                params![play_path, status.code(), id],
            ),
            None => conn.execute(
                "UPDATE file_upload_info SET file_status = ?1 WHERE file_id = ?2",
                params![status.code(), id],
            ),
        }
        .map_err(StoreError::Query)?;

        if changed == 0 {
            warn!("No job record [{}] to set to {:?}", id, status);
        } else {
            debug!("Job record [{}] set to {:?}", id, status);
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO file_upload_info (file_id, file_storage_root, file_save_path,
                 file_play_path, file_context_path, file_status, file_upload_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job.id,
                job.storage_root,
                job.save_path,
                job.play_path,
                job.context_path,
                job.status.code(),
                job.upload_time,
            ],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {} FROM file_upload_info WHERE file_id = ?1", JOB_COLUMNS),
            [id],
            row_to_job,
        )
        .optional()
        .map_err(StoreError::Query)
    }
}

impl JobStore for SqliteJobStore {
    fn claim_next(&self, host_filter: &str) -> Result<Option<Job>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM file_upload_info
                 WHERE file_context_path LIKE ?1 ESCAPE '\\' AND file_status = ?2
                 ORDER BY file_upload_time
                 LIMIT 1",
                JOB_COLUMNS
            ),
            params![contains_pattern(host_filter), JobStatus::Uploaded.code()],
            row_to_job,
        )
        .optional()
        .map_err(StoreError::Query)
    }

    fn lookup_converted(&self, host_filter: &str, id: &str) -> Result<Option<Job>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM file_upload_info
                 WHERE file_context_path LIKE ?1 ESCAPE '\\' AND file_status = ?2
                   AND file_id = ?3",
                JOB_COLUMNS
            ),
            params![contains_pattern(host_filter), JobStatus::Uploaded.code(), id],
            row_to_job,
        )
        .optional()
        .map_err(StoreError::Query)
    }

    fn mark_playable(&self, id: &str, play_path: &str) -> Result<(), StoreError> {
        self.update_status(id, JobStatus::Playable, Some(play_path))
    }

    fn mark_accepted_no_convert(&self, id: &str) -> Result<(), StoreError> {
        self.update_status(id, JobStatus::AcceptedNoConvert, None)
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let id: String = row.get(0)?;
    let upload_time = upload_time(row, 6, &id)?;
    Ok(Job {
        storage_root: row.get(1)?,
        save_path: row.get(2)?,
        play_path: row.get(3)?,
        context_path: row.get(4)?,
        status: row.get(5)?,
        upload_time,
        id,
    })
}

/// Rows are written by the upload service, so the time column is read
/// leniently: RFC 3339 / SQLite text, or unix seconds. Anything else is
/// `None`; ordering is done in SQL and never depends on this value.
fn upload_time(row: &Row<'_>, idx: usize, id: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    if let Ok(at) = row.get::<_, DateTime<Utc>>(idx) {
        return Ok(Some(at));
    }
    let parsed = match row.get_ref(idx)? {
        ValueRef::Integer(secs) => DateTime::from_timestamp(secs, 0),
        ValueRef::Null => return Ok(None),
        _ => None,
    };
    if parsed.is_none() {
        warn!("Unreadable file_upload_time on job record [{}]", id);
    }
    Ok(parsed)
}

/// `LIKE` pattern matching any value that contains `needle` literally
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
