pub mod types;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main daemon configuration, built once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    pub converter: ConverterConfig,
    #[serde(default)]
    pub intervals: IntervalConfig,
}

impl DaemonConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Default configuration file location, relative to the working directory
    pub fn default_path() -> PathBuf {
        PathBuf::from("conf").join("application.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "database.path must be set".to_string(),
            ));
        }
        if self.converter.host_filter.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "converter.host_filter must be set".to_string(),
            ));
        }
        if !self.converter.ffmpeg_path.exists() {
            return Err(ConfigError::Invalid(format!(
                "converter.ffmpeg_path {} does not exist",
                self.converter.ffmpeg_path.display()
            )));
        }
        if self.converter.audio_sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "converter.audio_sample_rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
