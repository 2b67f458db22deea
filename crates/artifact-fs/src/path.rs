//! Storage-relative path handling and repository path binding

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumAlgorithm;
use crate::constants::{ReservedPath, is_hidden_segment};
use crate::lock::LockKey;
use crate::{Error, Result};

/// A repository-relative path normalized to forward slashes.
///
/// Normalization drops empty and `.` segments and strips leading slashes.
/// Parent traversal (`..`), hidden (dot-prefixed) segments and control
/// characters are rejected, so a `NormalizedPath` can never escape its
/// repository root or address the reserved `.trash`/`.index` trees.
/// The empty path denotes the repository root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NormalizedPath {
    /// Internal representation always uses forward slashes
    inner: String,
}

impl NormalizedPath {
    /// Normalize and validate a client-supplied relative path.
    pub fn new(path: impl AsRef<str>) -> Result<Self> {
        let raw = path.as_ref();
        if raw.chars().any(|c| c.is_control()) {
            return Err(Error::invalid_path(raw, "contains control characters"));
        }

        let unified = raw.replace('\\', "/");
        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(Error::invalid_path(raw, "parent traversal is not allowed")),
                s if is_hidden_segment(s) => {
                    return Err(Error::invalid_path(
                        raw,
                        format!("hidden segment '{}' is reserved", s),
                    ));
                }
                s => segments.push(s),
            }
        }

        Ok(Self {
            inner: segments.join("/"),
        })
    }

    /// The repository root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Get the internal normalized string representation.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Whether this path denotes the repository root.
    pub fn is_root(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.inner.split('/').filter(|s| !s.is_empty())
    }

    /// Join this path with a relative segment, validating the result.
    pub fn join(&self, segment: &str) -> Result<Self> {
        if self.is_root() {
            return Self::new(segment);
        }
        Self::new(format!("{}/{}", self.inner, segment))
    }

    /// Get the parent directory, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let inner = match self.inner.rfind('/') {
            Some(idx) => self.inner[..idx].to_string(),
            None => String::new(),
        };
        Some(Self { inner })
    }

    /// Get the file name component.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.inner.rsplit('/').next()
    }

    /// Get the extension if present.
    pub fn extension(&self) -> Option<&str> {
        self.file_name().and_then(|name| {
            let idx = name.rfind('.')?;
            if idx == 0 { None } else { Some(&name[idx + 1..]) }
        })
    }

    /// Append a suffix to the file name (`lib.jar` + `.sha1`).
    pub fn with_suffix(&self, suffix: &str) -> Result<Self> {
        if self.is_root() || suffix.contains('/') || suffix.contains('\\') {
            return Err(Error::invalid_path(
                format!("{}{}", self.inner, suffix),
                "suffix must extend a file name",
            ));
        }
        Ok(Self {
            inner: format!("{}{}", self.inner, suffix),
        })
    }

    /// Path of the checksum side file for `algorithm`.
    pub fn side_file(&self, algorithm: ChecksumAlgorithm) -> Result<Self> {
        self.with_suffix(algorithm.suffix())
    }

    /// Segment-wise prefix test; the root is a prefix of everything.
    pub fn starts_with(&self, prefix: &NormalizedPath) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.inner == prefix.inner
            || (self.inner.starts_with(&prefix.inner)
                && self.inner.as_bytes().get(prefix.inner.len()) == Some(&b'/'))
    }

    /// Resolve this path under a physical root directory.
    pub fn to_native(&self, root: &Path) -> PathBuf {
        self.segments().fold(root.to_path_buf(), |acc, s| acc.join(s))
    }

    /// Recover a normalized path from a physical path located under `root`.
    pub fn from_native(root: &Path, native: &Path) -> Result<Self> {
        let relative = native.strip_prefix(root).map_err(|_| {
            Error::invalid_path(
                native.display().to_string(),
                format!("not located under {}", root.display()),
            )
        })?;
        Self::new(relative.to_string_lossy())
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl AsRef<str> for NormalizedPath {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl TryFrom<String> for NormalizedPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for NormalizedPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<NormalizedPath> for String {
    fn from(path: NormalizedPath) -> Self {
        path.inner
    }
}

/// Validate a storage or repository identifier.
///
/// Identifiers become directory names, so they are restricted to ASCII
/// alphanumerics plus `-`, `_` and `.`, and may not start with a dot.
pub fn validate_path_identifier(value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        Some("must not be empty")
    } else if value.len() > 128 {
        Some("must be at most 128 characters")
    } else if value.starts_with('.') {
        Some("must not start with a dot")
    } else if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Some("may only contain ASCII letters, digits, '-', '_' and '.'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(Error::InvalidIdentifier {
            value: value.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// A relative path bound to one repository and its physical backing root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryPath {
    storage_id: String,
    repository_id: String,
    path: NormalizedPath,
    root: PathBuf,
}

impl RepositoryPath {
    /// Bind `path` to the repository whose content lives under `root`.
    pub fn new(
        storage_id: impl Into<String>,
        repository_id: impl Into<String>,
        path: NormalizedPath,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage_id: storage_id.into(),
            repository_id: repository_id.into(),
            path,
            root: root.into(),
        }
    }

    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }

    /// The repository-relative part.
    pub fn path(&self) -> &NormalizedPath {
        &self.path
    }

    /// Physical root of the owning repository.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Physical location of this path.
    pub fn to_native(&self) -> PathBuf {
        self.path.to_native(&self.root)
    }

    /// Same repository, different relative path.
    pub fn with_path(&self, path: NormalizedPath) -> Self {
        Self {
            storage_id: self.storage_id.clone(),
            repository_id: self.repository_id.clone(),
            path,
            root: self.root.clone(),
        }
    }

    /// The checksum side file that accompanies this path.
    pub fn side_file(&self, algorithm: ChecksumAlgorithm) -> Result<Self> {
        Ok(self.with_path(self.path.side_file(algorithm)?))
    }

    /// Physical location of the mirrored entry under the repository trash root.
    pub fn trash_location(&self) -> PathBuf {
        self.path.to_native(&self.root.join(ReservedPath::TrashDir.as_str()))
    }

    pub fn exists(&self) -> bool {
        self.to_native().exists()
    }

    pub fn is_file(&self) -> bool {
        self.to_native().is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.to_native().is_dir()
    }

    /// Key used for write serialization and single-flight.
    pub fn lock_key(&self) -> LockKey {
        LockKey::new(&self.storage_id, &self.repository_id, self.path.as_str())
    }
}

impl fmt::Display for RepositoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.storage_id, self.repository_id, self.path)
    }
}

/// Supplies the physical backing location of each repository.
pub trait FileSystemProvider: Send + Sync + fmt::Debug {
    /// Physical root directory of `storage_id`/`repository_id`.
    fn repository_root(&self, storage_id: &str, repository_id: &str) -> PathBuf;

    /// Validate the identifiers and path, then bind them to a backing root.
    fn resolve(&self, storage_id: &str, repository_id: &str, path: &str) -> Result<RepositoryPath> {
        validate_path_identifier(storage_id)?;
        validate_path_identifier(repository_id)?;
        let path = NormalizedPath::new(path)?;
        Ok(RepositoryPath::new(
            storage_id,
            repository_id,
            path,
            self.repository_root(storage_id, repository_id),
        ))
    }
}

/// Local disk layout: `{base}/storages/{storageId}/{repositoryId}`.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    base: PathBuf,
}

impl LocalFileSystem {
    /// Create the storages directory under `base` and bind to it.
    pub fn new(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        let storages = base.join(ReservedPath::StoragesDir.as_str());
        fs::create_dir_all(&storages).map_err(|e| Error::io(&storages, e))?;
        let base = dunce::canonicalize(base).map_err(|e| Error::io(base, e))?;
        Ok(Self { base })
    }

    /// The canonical base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl FileSystemProvider for LocalFileSystem {
    fn repository_root(&self, storage_id: &str, repository_id: &str) -> PathBuf {
        self.base
            .join(ReservedPath::StoragesDir.as_str())
            .join(storage_id)
            .join(repository_id)
    }
}
