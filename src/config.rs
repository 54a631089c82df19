//! Configuration parsing and structures

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level configuration for the mirror daemon
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory to expose through the mount
    pub source: PathBuf,

    /// Mount parameters
    pub mount: MountConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Mount parameters
#[derive(Debug, Clone, Deserialize)]
pub struct MountConfig {
    /// Path where the filesystem will be mounted
    pub mount_point: PathBuf,

    /// Volume name reported to the backend
    #[serde(default = "default_volume_name")]
    pub volume_name: String,

    /// Raw backend flags; the provider's defaults are used when unset
    pub mount_flags: Option<String>,

    /// Mount read-only
    #[serde(default)]
    pub read_only: bool,

    /// Backend port, where supported
    pub port: Option<u16>,
}

fn default_volume_name() -> String {
    "mirror".to_string()
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mount.volume_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "volume name must not be empty".to_string(),
            ));
        }
        if self.source == self.mount.mount_point {
            return Err(ConfigError::ValidationError(
                "source and mount point must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
