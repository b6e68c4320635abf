//! Error types for snapshot, restore and verification.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive not found: {0}")]
    NotFound(String),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Collection '{collection}' failed: {message}")]
    Collection { collection: String, message: String },

    #[error("Failed to remove old archive {file}: {message}")]
    Retention { file: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Restore cancelled by operator")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl BackupError {
    pub fn collection(collection: &str, err: impl std::fmt::Display) -> Self {
        BackupError::Collection {
            collection: collection.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
