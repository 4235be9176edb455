//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from shared-storage operations.
///
/// None of these are retried: they point at misconfiguration, not load.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The shared directory is missing or not accessible.
    #[error("shared storage unavailable at {path}: {reason}")]
    Unavailable {
        /// Directory that was expected.
        path: PathBuf,
        /// Why it could not be used.
        reason: String,
    },

    /// IO error while reading or writing a shared file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A shared file exists but could not be parsed, possibly because a
    /// write is still in progress.
    #[error("unreadable shared file {path}: {reason}")]
    Corrupt {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },
}

impl StorageError {
    /// Returns true for parse failures that readers treat as "no update".
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StorageError::Corrupt { .. })
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
