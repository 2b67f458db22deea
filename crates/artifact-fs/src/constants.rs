//! Reserved names inside the storage tree.

use std::path::Path;

/// Directories and markers the storage layer owns inside a repository root.
///
/// Every reserved name starts with a dot, and dot-prefixed segments are
/// rejected in artifact paths, so clients can never address them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedPath {
    /// The `storages` directory under the configured base directory
    StoragesDir,
    /// The `.trash` directory (soft-deleted content, mirrors repository layout)
    TrashDir,
    /// The `.index` directory (derived repository index)
    IndexDir,
    /// The `.backup` directory (content held aside while an overwrite may still be undone)
    BackupDir,
}

impl ReservedPath {
    /// Get the string representation of the path.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoragesDir => "storages",
            Self::TrashDir => ".trash",
            Self::IndexDir => ".index",
            Self::BackupDir => ".backup",
        }
    }
}

impl AsRef<Path> for ReservedPath {
    fn as_ref(&self) -> &Path {
        Path::new(self.as_str())
    }
}

impl AsRef<str> for ReservedPath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for ReservedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Name of the index document inside [`ReservedPath::IndexDir`].
pub const INDEX_FILE: &str = "index.json";

/// Suffix of in-flight temporary files.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Whether a single path segment is hidden (dot-prefixed).
pub fn is_hidden_segment(segment: &str) -> bool {
    segment.starts_with('.')
}
