//! Error types shared by the backup engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Source directory does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Business software '{0}' is running, backup refused")]
    BusinessSoftwareRunning(String),

    #[error("No encryption key is configured")]
    EncryptionKeyMissing,

    #[error("Encryption tool not found: {}", .0.display())]
    EncryptionToolMissing(PathBuf),

    #[error("Encryption failed (exit code {code:?}): {stderr}")]
    EncryptionFailed { code: Option<i32>, stderr: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("A job named '{0}' already exists")]
    DuplicateJob(String),

    #[error("Invalid job definition: {0}")]
    InvalidJob(String),

    #[error("Invalid job selection: {0}")]
    InvalidSelection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;
