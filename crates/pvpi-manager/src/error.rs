//! Error types for the manager.

use std::path::PathBuf;

use pvpi_client::ClientError;
use pvpi_link::LinkError;
use thiserror::Error;

/// Errors raised while setting up or driving the manager.
///
/// The control loop itself never returns these for device trouble; it turns
/// client errors into state transitions. They surface from setup, the CLI
/// commands and the host hooks.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for this schema.
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Telemetry log I/O failed.
    #[error("telemetry log {path}: {source}")]
    Telemetry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A service unit file could not be written or removed.
    #[error("service unit {path}: {source}")]
    ServiceFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A host command failed to run or exited non-zero.
    #[error("host command `{command}` failed: {detail}")]
    HostCommand { command: String, detail: String },

    /// Device operation failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The broker or transport could not be set up.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// The interrupt handler could not be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;
