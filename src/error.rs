use std::path::PathBuf;

/// Failure talking to the job store. Recovered by sleeping and retrying.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open job store: {0}")]
    Connect(#[source] rusqlite::Error),

    #[error("Job store query failed: {0}")]
    Query(#[source] rusqlite::Error),

    /// The store cannot be reached at all, e.g. the database file is missing.
    #[error("Job store unavailable: {0}")]
    Unavailable(String),
}

/// Failure running the external transcoder.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Failed to start {}: {source}", binary.display())]
    Launch {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for transcoder: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Transcoder exited with status: {0}")]
    Exit(std::process::ExitStatus),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("An instance of the daemon is already running")]
    AlreadyRunning,

    #[error("Failed to open lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Giving up after {0} consecutive job store failures")]
    RetriesExhausted(u32),
}
