//! Configuration management module
//!
//! Handles loading, saving, and validation of the speed test
//! parameters.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Result, SpeedTestError, APP_NAME, CONFIG_FILE};

/// Default amount of data written and read back per run (2 GiB)
pub const DEFAULT_TOTAL_SIZE: u64 = 2 * 1024 * 1024 * 1024;
/// Default size of a single I/O call (64 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;
/// Chunk sizes must be a multiple of this for unbuffered I/O
pub const DIRECT_IO_ALIGNMENT: u64 = 4096;

const MAX_TOTAL_SIZE: u64 = 100 * 1024 * 1024 * 1024; // 100 GiB
const MAX_CHUNK_SIZE: u64 = 1024 * 1024 * 1024; // 1 GiB
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Speed test configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedTestConfig {
    /// Total bytes written, then read back (in bytes)
    pub total_size: u64,
    /// Size of each sequential write/read (in bytes)
    pub chunk_size: u64,
    /// Directory used when the volume root cannot hold the test file.
    /// `None` means the user's home directory.
    pub fallback_dir: Option<PathBuf>,
    /// Log level for the binary's subscriber
    pub log_level: String,
}

impl Default for SpeedTestConfig {
    fn default() -> Self {
        Self {
            total_size: DEFAULT_TOTAL_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            fallback_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl SpeedTestConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.total_size == 0 {
            return Err(SpeedTestError::Config(
                "Total size must be greater than 0".to_string(),
            ));
        }

        if self.chunk_size == 0 {
            return Err(SpeedTestError::Config(
                "Chunk size must be greater than 0".to_string(),
            ));
        }

        if self.total_size > MAX_TOTAL_SIZE {
            return Err(SpeedTestError::Config(format!(
                "Total size too large: {} bytes (max: {} bytes)",
                self.total_size, MAX_TOTAL_SIZE
            )));
        }

        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(SpeedTestError::Config(format!(
                "Chunk size too large: {} bytes (max: {} bytes)",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }

        if self.chunk_size % DIRECT_IO_ALIGNMENT != 0 {
            return Err(SpeedTestError::Config(format!(
                "Chunk size must be a multiple of {} bytes",
                DIRECT_IO_ALIGNMENT
            )));
        }

        if self.total_size % self.chunk_size != 0 {
            return Err(SpeedTestError::Config(format!(
                "Total size {} is not a multiple of chunk size {}",
                self.total_size, self.chunk_size
            )));
        }

        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(SpeedTestError::Config(format!(
                "Unknown log level: {}",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Number of chunks written per run
    pub fn iterations(&self) -> u64 {
        if self.chunk_size == 0 {
            0
        } else {
            self.total_size / self.chunk_size
        }
    }

    /// Directory used when the volume root is not writable
    pub fn resolved_fallback_dir(&self) -> Option<PathBuf> {
        self.fallback_dir.clone().or_else(dirs::home_dir)
    }

    /// Log level as a `tracing` level, `INFO` if unparseable
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }

    pub fn with_total_size(mut self, size: u64) -> Self {
        self.total_size = size;
        self
    }

    pub fn with_chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_dir = Some(dir.into());
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Load configuration from the standard config file location.
    /// Returns the defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| {
            SpeedTestError::Config(format!(
                "Failed to read config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to the standard config file location
    pub fn save(&self) -> Result<()> {
        self.validate()?;

        let config_path = Self::config_file_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SpeedTestError::Config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = toml::to_string_pretty(self)?;

        fs::write(&config_path, content).map_err(|e| {
            SpeedTestError::Config(format!(
                "Failed to write config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Standard configuration file path: `$CONFIG_HOME/ssdspeed/ssdspeed.toml`
    pub fn config_file_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            SpeedTestError::Config("Unable to determine config directory".to_string())
        })?;

        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}
