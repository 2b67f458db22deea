//! Error types for artifact-layout

use crate::format::LayoutKind;

/// Result type for layout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while mapping paths and coordinates
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The path is not canonical for the layout. Deterministic, never retried.
    #[error("Cannot parse '{path}' as a {layout} path: {reason}")]
    Parse {
        layout: LayoutKind,
        path: String,
        reason: String,
    },

    #[error("Unsupported layout '{alias}'")]
    UnsupportedLayout { alias: String },

    #[error("{found} coordinates cannot be used with the {expected} layout")]
    LayoutMismatch {
        expected: LayoutKind,
        found: LayoutKind,
    },

    #[error("Invalid {layout} coordinates: {reason}")]
    InvalidCoordinates { layout: LayoutKind, reason: String },

    #[error("Failed to generate metadata at {path}: {message}")]
    Metadata { path: String, message: String },

    #[error(transparent)]
    Fs(#[from] artifact_fs::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn parse(layout: LayoutKind, path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            layout,
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid(layout: LayoutKind, reason: impl Into<String>) -> Self {
        Self::InvalidCoordinates {
            layout,
            reason: reason.into(),
        }
    }
}
