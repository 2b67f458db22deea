//! Error types for artifact-core

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Result type for artifact-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in artifact-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage not found: {storage_id}")]
    StorageNotFound { storage_id: String },

    #[error("Repository not found: {storage_id}:{repository_id}")]
    RepositoryNotFound {
        storage_id: String,
        repository_id: String,
    },

    #[error("Artifact not found: {path}")]
    ArtifactNotFound { path: String },

    /// Remote retries exhausted or the remote failed permanently.
    #[error("Fetching {url} failed after {attempts} attempt(s): {message}")]
    RemoteFetch {
        url: String,
        attempts: u32,
        message: String,
    },

    /// No pooled remote connection became free in time.
    #[error("Timed out after {timeout:?} waiting for a connection to {remote}")]
    PoolTimeout { remote: String, timeout: Duration },

    #[error("Repository {repository} is out of service")]
    RepositoryUnavailable { repository: String },

    #[error("Operation '{operation}' is not supported by repository {repository}")]
    UnsupportedOperation {
        repository: String,
        operation: String,
    },

    #[error("Repository {repository} with policy '{policy}' does not accept {path}")]
    PolicyViolation {
        repository: String,
        policy: String,
        path: String,
    },

    #[error("Redeployment of {path} is not allowed")]
    RedeploymentNotAllowed { path: String },

    #[error("Deleting {path} is not allowed: {reason}")]
    DeleteNotAllowed { path: String, reason: String },

    #[error("Group {repository} has no hosted member to deploy to")]
    NoDeployTarget { repository: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to parse configuration {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Unsupported configuration format: {path}")]
    UnsupportedFormat { path: PathBuf },

    /// An outcome shared between the waiters of one single-flight call.
    #[error(transparent)]
    Shared(Arc<Error>),

    // Transparent wrappers for underlying crate errors
    /// Storage error from artifact-fs
    #[error(transparent)]
    Fs(#[from] artifact_fs::Error),

    /// Codec or metadata error from artifact-layout
    #[error(transparent)]
    Layout(#[from] artifact_layout::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn unsupported(repository: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            repository: repository.into(),
            operation: operation.into(),
        }
    }

    /// Whether the requested content does not exist, at any wrapping depth.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ArtifactNotFound { .. } => true,
            Self::Fs(e) => e.is_not_found(),
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            Self::Shared(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteFetch { .. } | Self::PoolTimeout { .. } => true,
            Self::Fs(artifact_fs::Error::LockTimeout { .. }) => true,
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether content failed checksum verification.
    pub fn is_integrity(&self) -> bool {
        match self {
            Self::Fs(artifact_fs::Error::Integrity { .. }) => true,
            Self::Shared(e) => e.is_integrity(),
            _ => false,
        }
    }
}
