//! Error types for sentinel-state

use thiserror::Error;

/// Errors that can occur in the state persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem error while reading or writing the history file
    #[error("history I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A status change that the record's lifecycle does not allow
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The blocking write task was lost before it reported back
    #[error("persistence task failed: {0}")]
    Task(String),
}
