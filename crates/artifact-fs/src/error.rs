//! Error types for artifact-fs

use std::path::PathBuf;
use std::time::Duration;

use crate::checksum::ChecksumAlgorithm;

/// Result type for artifact-fs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in artifact-fs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: String },

    #[error("Path not found: {path}")]
    NotFound { path: String },

    /// Computed digest does not match the one the caller (or remote) declared.
    #[error("Checksum mismatch for {path} ({algorithm}): expected {expected}, got {actual}")]
    Integrity {
        path: String,
        algorithm: ChecksumAlgorithm,
        expected: String,
        actual: String,
    },

    #[error("Timed out after {timeout:?} waiting for the write lock on {path}")]
    LockTimeout { path: String, timeout: Duration },

    #[error("Lock acquisition failed for {path}")]
    LockFailed { path: PathBuf },

    #[error("Trash state conflict for {path}: {message}")]
    TrashState { path: String, message: String },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn trash_state(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TrashState {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the requested content does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
