use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static RESOLUTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)[*xX](\d+)$").expect("resolution pattern is valid")
});

/// Job store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
}

impl DatabaseConfig {
    /// Database file location; a relative `path` is taken from `work_dir`
    pub fn resolve(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(&self.path)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/zfms.db"),
        }
    }
}

/// Encoder quality scale per quality level (lower = better)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub high: u32,
    pub middle: u32,
    pub low: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            high: 10,
            middle: 10,
            low: 10,
        }
    }
}

/// Fixed output frame size, written as `640*360` or `640x360`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OutputResolution {
    pub width: u32,
    pub height: u32,
}

impl OutputResolution {
    /// Argument form expected by ffmpeg's `-s`
    pub fn ffmpeg_size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl Default for OutputResolution {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
        }
    }
}

impl TryFrom<String> for OutputResolution {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for OutputResolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ConfigError::Invalid(format!(
                "converter.resolution must look like 640*360, got {:?}",
                s
            ))
        };
        let caps = RESOLUTION_PATTERN.captures(s.trim()).ok_or_else(invalid)?;
        let width: u32 = caps[1].parse().map_err(|_| invalid())?;
        let height: u32 = caps[2].parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl From<OutputResolution> for String {
    fn from(value: OutputResolution) -> Self {
        format!("{}*{}", value.width, value.height)
    }
}

impl fmt::Display for OutputResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*{}", self.width, self.height)
    }
}

/// Transcoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Only jobs whose storage path contains this string belong to this host
    pub host_filter: String,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub resolution: OutputResolution,
    #[serde(default = "default_audio_sample_rate")]
    pub audio_sample_rate: u32,
}

fn default_audio_sample_rate() -> u32 {
    44100
}

/// Sleep intervals of the worker loop, in minutes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    /// Wait after a job store failure
    pub fails_retry_minutes: u64,
    /// Wait after a completed cycle
    pub each_time_minutes: u64,
    /// Stop after this many consecutive store failures; unset retries forever
    pub max_store_retries: Option<u32>,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            fails_retry_minutes: 5,
            each_time_minutes: 5,
            max_store_retries: None,
        }
    }
}

impl IntervalConfig {
    pub fn fails_retry_secs(&self) -> u64 {
        self.fails_retry_minutes.saturating_mul(60)
    }

    pub fn each_time_secs(&self) -> u64 {
        self.each_time_minutes.saturating_mul(60)
    }
}
