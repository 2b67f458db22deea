//! Storage layer for the artifact manager
//!
//! Maps `(storageId, repositoryId, path)` to physical locations, streams
//! content in and out with checksum side files and atomic publication, and
//! manages the per-repository trash.

pub mod checksum;
pub mod constants;
pub mod error;
pub mod io;
pub mod lock;
pub mod path;
pub mod trash;

pub use checksum::{ChecksumAlgorithm, Checksums, DigestEncoding, MultiDigest, SideFileEncodings};
pub use constants::ReservedPath;
pub use error::{Error, Result};
pub use io::{
    ArtifactIo, ArtifactReader, ArtifactWriter, RegeneratedChecksums, RobustnessConfig,
    StoredContent, WriteOptions, write_atomic,
};
pub use lock::{LockKey, PathLockGuard, PathLocks};
pub use path::{
    FileSystemProvider, LocalFileSystem, NormalizedPath, RepositoryPath, validate_path_identifier,
};
pub use trash::{ArtifactState, ContentBackup, DeleteOutcome, TrashManager};
