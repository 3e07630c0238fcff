//! SSDSpeed - sequential volume throughput tester
//!
//! Writes a large temporary file to a volume and reads it back while
//! bypassing the OS page cache, reporting live progress and the final
//! write/read speeds in MB/s.

use std::path::PathBuf;

use thiserror::Error;

pub mod bench;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod io;
pub mod models;
pub mod util;

/// Errors produced while configuring or running a speed test
#[derive(Debug, Error)]
pub enum SpeedTestError {
    /// An open/write/read/flush call failed
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Neither the volume root nor a fallback directory can hold the test file
    #[error("volume {} is unavailable: {reason}", path.display())]
    VolumeUnavailable { path: PathBuf, reason: String },
    /// The read phase did not get a single byte back
    #[error("no data could be read back from {}", path.display())]
    EmptyRead { path: PathBuf },
    /// Configuration validation or parsing error
    #[error("configuration error: {0}")]
    Config(String),
    /// The requested volume is not in the catalog
    #[error("unknown volume: {}", .0.display())]
    VolumeNotFound(PathBuf),
    /// A background run ended without reporting a result
    #[error("worker error: {0}")]
    Worker(String),
}

impl SpeedTestError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SpeedTestError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Underlying OS error, when there is one
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            SpeedTestError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for SpeedTestError {
    fn from(err: toml::de::Error) -> Self {
        SpeedTestError::Config(format!("TOML parsing error: {}", err))
    }
}

impl From<toml::ser::Error> for SpeedTestError {
    fn from(err: toml::ser::Error) -> Self {
        SpeedTestError::Config(format!("TOML serialization error: {}", err))
    }
}

/// Result type alias for speed test operations
pub type Result<T> = std::result::Result<T, SpeedTestError>;

/// Error presentation helpers
pub mod error {
    use super::SpeedTestError;
    use std::io::ErrorKind;

    /// Convert an error to a short message with a hint for the user
    pub fn user_friendly_message(error: &SpeedTestError) -> String {
        if let Some(io_err) = error.io_error() {
            match io_err.kind() {
                ErrorKind::PermissionDenied => {
                    return format!("{}. Check permissions or pick another volume.", error)
                }
                ErrorKind::StorageFull => {
                    return format!("{}. Free up space or lower the test size.", error)
                }
                ErrorKind::ReadOnlyFilesystem => {
                    return format!("{}. The volume is mounted read-only.", error)
                }
                _ => {}
            }
        }

        match error {
            SpeedTestError::VolumeUnavailable { .. } => {
                format!("{}. No writable location was found for the test file.", error)
            }
            SpeedTestError::Config(_) => format!("{}. Check your settings.", error),
            _ => error.to_string(),
        }
    }
}

pub const APP_NAME: &str = "ssdspeed";
pub const CONFIG_FILE: &str = "ssdspeed.toml";
pub const TEMP_FILE_PREFIX: &str = ".speedtest_temp_";

pub use bench::{BenchmarkEngine, ProgressSink, RunSummary, TestCoordinator};
pub use catalog::{VolumeCatalog, VolumeSource};
pub use config::SpeedTestConfig;
pub use models::{RunEvent, TestStatus, Volume, VolumeTestState};
