//! Error taxonomy for backup and restore runs.
//!
//! Every variant is fatal for the run that raised it; `exit_code` maps it to
//! the process exit status reported by the command line front ends.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Required tool not found: {0}")]
    MissingTool(String),

    #[error("Insufficient disk space on {location}: required {required} bytes, available {available} bytes")]
    InsufficientSpace {
        location: String,
        required: u64,
        available: u64,
    },

    #[error("Incompatible configuration: {0}")]
    Incompatible(String),

    #[error("Sync failed for {}", .failed.join(", "))]
    SyncFailed { failed: Vec<String> },

    #[error("Restore target is not pristine: {0}")]
    NotPristine(String),

    #[error("Cluster processes still running: {0}")]
    ClusterRunning(String),

    #[error("Cannot establish remote session: {0}")]
    Unreachable(String),

    #[error("Remote command failed on {host} (status {status}): {command}")]
    RemoteCommand {
        host: String,
        command: String,
        status: i32,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Interrupted by signal")]
    Interrupted,
}

impl BackupError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::Config(_)
            | BackupError::RemoteCommand { .. }
            | BackupError::Io(_)
            | BackupError::Serialization(_) => 1,
            BackupError::MissingTool(_) => 2,
            BackupError::InsufficientSpace { .. } => 3,
            BackupError::Incompatible(_) => 4,
            BackupError::SyncFailed { .. } => 5,
            BackupError::NotPristine(_) => 6,
            BackupError::ClusterRunning(_) => 7,
            BackupError::Interrupted => 130,
            BackupError::Unreachable(_) => 255,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
