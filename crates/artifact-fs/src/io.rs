//! Checksummed content I/O with atomic publication
//!
//! Artifact content is streamed into a hidden temp file next to its target
//! while every configured digest is computed on the fly. Only when the writer
//! is finished, the digests verified and the side files persisted does the
//! temp file get renamed over the target, so readers observe either the old
//! or the new content and never a partial file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::checksum::{self, ChecksumAlgorithm, Checksums, MultiDigest, SideFileEncodings};
use crate::constants::{TEMP_SUFFIX, is_hidden_segment};
use crate::lock::{PathLockGuard, PathLocks};
use crate::path::RepositoryPath;
use crate::{Error, Result};

/// Tuning for lock waits and durability.
#[derive(Debug, Clone, Copy)]
pub struct RobustnessConfig {
    /// How long a writer waits for the path lock before failing
    pub lock_timeout: Duration,
    /// Whether to fsync content before publishing it
    pub enable_fsync: bool,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            enable_fsync: true,
        }
    }
}

/// Hidden temp file name next to `target`.
fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}{}", name, Uuid::new_v4().simple(), TEMP_SUFFIX))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    Ok(())
}

/// Write small derived content atomically to a file with locking.
///
/// Uses write-to-temp-then-rename so a crash never leaves a truncated file.
pub fn write_atomic(path: &Path, content: &[u8], config: RobustnessConfig) -> Result<()> {
    ensure_parent(path)?;
    let temp_path = temp_path_for(path);

    let result = (|| {
        let mut temp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| Error::io(&temp_path, e))?;

        temp_file.lock_exclusive().map_err(|_| Error::LockFailed {
            path: path.to_path_buf(),
        })?;
        temp_file
            .write_all(content)
            .map_err(|e| Error::io(&temp_path, e))?;
        if config.enable_fsync {
            temp_file.sync_all().map_err(|e| Error::io(&temp_path, e))?;
        }
        // Released on drop as well; unlock first so rename works everywhere.
        let _ = FileExt::unlock(&temp_file);
        drop(temp_file);

        fs::rename(&temp_path, path).map_err(|e| Error::io(path, e))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Remove a file, treating a missing file as success.
///
/// Returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Recursively list regular files under `dir`, skipping hidden entries.
///
/// A missing directory yields an empty list. Results are sorted.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if dir.is_file() {
        files.push(dir.to_path_buf());
        return Ok(files);
    }
    collect_files(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::io(dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let name = entry.file_name();
        if is_hidden_segment(&name.to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| Error::io(&path, e))?;
        if file_type.is_dir() {
            collect_files(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Remove empty directories from `start` upwards, stopping at `stop`.
pub fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        // remove_dir only succeeds on empty directories
        if fs::remove_dir(dir).is_err() {
            break;
        }
        trace!(dir = %dir.display(), "pruned empty directory");
        current = dir.parent();
    }
}

/// Options for [`ArtifactIo::open_write`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Algorithms whose side files are persisted next to the content
    pub algorithms: Vec<ChecksumAlgorithm>,
    /// Digests the content must match (client-declared or remote-declared)
    pub expected: Checksums,
    /// Set when the content itself is a side file for this algorithm; the
    /// stored digest is checked against the primary artifact if it exists
    pub side_file_of: Option<ChecksumAlgorithm>,
    /// Encoding of the persisted side files
    pub encodings: SideFileEncodings,
}

impl WriteOptions {
    pub fn with_algorithms(algorithms: &[ChecksumAlgorithm]) -> Self {
        Self {
            algorithms: algorithms.to_vec(),
            ..Self::default()
        }
    }

    pub fn expecting(mut self, expected: Checksums) -> Self {
        self.expected = expected;
        self
    }

    pub fn side_file_of(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.side_file_of = Some(algorithm);
        self
    }

    pub fn with_encodings(mut self, encodings: SideFileEncodings) -> Self {
        self.encodings = encodings;
        self
    }

    fn digest_algorithms(&self) -> Vec<ChecksumAlgorithm> {
        let mut algorithms = self.algorithms.clone();
        algorithms.extend(self.expected.keys().copied());
        algorithms.sort();
        algorithms.dedup();
        algorithms
    }
}

/// Result of a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
    pub path: RepositoryPath,
    pub size: u64,
    pub checksums: Checksums,
}

/// Outcome of regenerating the side files of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegeneratedChecksums {
    pub written: Vec<ChecksumAlgorithm>,
    pub skipped: Vec<ChecksumAlgorithm>,
}

/// Entry point for artifact content I/O.
#[derive(Debug, Clone)]
pub struct ArtifactIo {
    locks: Arc<PathLocks>,
    config: RobustnessConfig,
}

impl Default for ArtifactIo {
    fn default() -> Self {
        Self::new(RobustnessConfig::default())
    }
}

impl ArtifactIo {
    pub fn new(config: RobustnessConfig) -> Self {
        Self::with_locks(config, PathLocks::new())
    }

    /// Share a lock table with other components (e.g. the trash manager).
    pub fn with_locks(config: RobustnessConfig, locks: Arc<PathLocks>) -> Self {
        Self { locks, config }
    }

    pub fn config(&self) -> RobustnessConfig {
        self.config
    }

    pub fn locks(&self) -> &Arc<PathLocks> {
        &self.locks
    }

    /// Take the write lock for a logical path.
    pub fn lock(&self, path: &RepositoryPath) -> Result<PathLockGuard> {
        self.locks.acquire(path.lock_key(), self.config.lock_timeout)
    }

    /// Open committed content for reading. Never waits on writers.
    pub fn open_read(&self, path: &RepositoryPath) -> Result<ArtifactReader> {
        let native = path.to_native();
        let file = match File::open(&native) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    path: path.to_string(),
                });
            }
            Err(e) => return Err(Error::io(&native, e)),
        };
        let metadata = file.metadata().map_err(|e| Error::io(&native, e))?;
        if !metadata.is_file() {
            return Err(Error::NotFound {
                path: path.to_string(),
            });
        }
        trace!(path = %path, size = metadata.len(), "opened for read");
        Ok(ArtifactReader {
            file,
            path: path.clone(),
            len: metadata.len(),
        })
    }

    /// Open a writer for `path`, holding its write lock until finished or dropped.
    pub fn open_write(&self, path: &RepositoryPath, options: WriteOptions) -> Result<ArtifactWriter> {
        if path.path().is_root() {
            return Err(Error::invalid_path("", "cannot write to the repository root"));
        }
        let guard = self.lock(path)?;

        let target = path.to_native();
        ensure_parent(&target)?;
        let temp_path = temp_path_for(&target);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| Error::io(&temp_path, e))?;
        file.lock_exclusive().map_err(|_| Error::LockFailed {
            path: target.clone(),
        })?;

        debug!(path = %path, temp = %temp_path.display(), "opened for write");
        Ok(ArtifactWriter {
            target: path.clone(),
            temp_path,
            file: Some(file),
            digest: Some(MultiDigest::new(&options.digest_algorithms())),
            options,
            written: 0,
            config: self.config,
            finished: false,
            _guard: guard,
        })
    }

    /// Digests recorded in the existing side files of `path`.
    pub fn stored_checksums(&self, path: &RepositoryPath) -> Result<Checksums> {
        let mut out = Checksums::new();
        for algorithm in ChecksumAlgorithm::ALL {
            let side = path.side_file(algorithm)?.to_native();
            if let Some(digest) =
                checksum::read_side_file(algorithm, &side).map_err(|e| Error::io(&side, e))?
            {
                out.insert(algorithm, digest);
            }
        }
        Ok(out)
    }

    /// Remove every side file of `path`.
    pub fn remove_side_files(&self, path: &RepositoryPath) -> Result<()> {
        for algorithm in ChecksumAlgorithm::ALL {
            remove_if_exists(&path.side_file(algorithm)?.to_native())?;
        }
        Ok(())
    }

    /// Recompute side files of existing content.
    ///
    /// Side files that already exist are left alone unless `force` is set.
    pub fn regenerate_side_files(
        &self,
        path: &RepositoryPath,
        algorithms: &[ChecksumAlgorithm],
        encodings: &SideFileEncodings,
        force: bool,
    ) -> Result<RegeneratedChecksums> {
        let _guard = self.lock(path)?;
        let native = path.to_native();
        if !native.is_file() {
            return Err(Error::NotFound {
                path: path.to_string(),
            });
        }

        let mut outcome = RegeneratedChecksums::default();
        let mut missing = Vec::new();
        for &algorithm in algorithms {
            if !force && path.side_file(algorithm)?.is_file() {
                outcome.skipped.push(algorithm);
            } else {
                missing.push(algorithm);
            }
        }
        if missing.is_empty() {
            return Ok(outcome);
        }

        let computed =
            checksum::compute_file_checksums(&native, &missing).map_err(|e| Error::io(&native, e))?;
        for (algorithm, digest) in computed {
            let rendered = encodings.get(&algorithm).copied().unwrap_or_default().render(&digest);
            write_atomic(
                &path.side_file(algorithm)?.to_native(),
                rendered.as_bytes(),
                self.config,
            )?;
            outcome.written.push(algorithm);
        }
        debug!(path = %path, written = ?outcome.written, "regenerated side files");
        Ok(outcome)
    }
}

/// Committed content opened for reading.
#[derive(Debug)]
pub struct ArtifactReader {
    file: File,
    path: RepositoryPath,
    len: u64,
}

impl ArtifactReader {
    pub fn path(&self) -> &RepositoryPath {
        &self.path
    }

    /// Size of the content when it was opened.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the remaining content into memory.
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.len as usize);
        self.file
            .read_to_end(&mut buffer)
            .map_err(|e| Error::io(self.path.to_native(), e))?;
        Ok(buffer)
    }
}

impl Read for ArtifactReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// Streaming writer that publishes content on [`ArtifactWriter::finish`].
///
/// Dropping an unfinished writer discards the temp file, which is how a
/// client disconnect mid-upload is handled.
#[derive(Debug)]
pub struct ArtifactWriter {
    target: RepositoryPath,
    temp_path: PathBuf,
    file: Option<File>,
    digest: Option<MultiDigest>,
    options: WriteOptions,
    written: u64,
    config: RobustnessConfig,
    finished: bool,
    _guard: PathLockGuard,
}

impl ArtifactWriter {
    pub fn path(&self) -> &RepositoryPath {
        &self.target
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Verify digests, persist side files and publish the content.
    pub fn finish(mut self) -> Result<StoredContent> {
        let result = self.commit();
        if result.is_err() {
            self.discard();
        }
        result
    }

    fn commit(&mut self) -> Result<StoredContent> {
        let mut file = self.file.take().ok_or_else(|| Error::LockFailed {
            path: self.temp_path.clone(),
        })?;
        file.flush().map_err(|e| Error::io(&self.temp_path, e))?;
        if self.config.enable_fsync {
            file.sync_all().map_err(|e| Error::io(&self.temp_path, e))?;
        }
        let _ = FileExt::unlock(&file);
        drop(file);

        let checksums = self
            .digest
            .take()
            .map(MultiDigest::finalize)
            .unwrap_or_default();

        for (algorithm, expected) in &self.options.expected {
            let expected = checksum::normalize_digest(*algorithm, expected)
                .unwrap_or_else(|| expected.trim().to_ascii_lowercase());
            let actual = checksums.get(algorithm).cloned().unwrap_or_default();
            if actual != expected {
                warn!(path = %self.target, %algorithm, %expected, %actual, "checksum mismatch, rejecting write");
                return Err(Error::Integrity {
                    path: self.target.to_string(),
                    algorithm: *algorithm,
                    expected,
                    actual,
                });
            }
        }

        if let Some(algorithm) = self.options.side_file_of {
            self.verify_side_file(algorithm)?;
        }

        let written_sides = self.persist_side_files(&checksums)?;

        let native = self.target.to_native();
        if let Err(e) = fs::rename(&self.temp_path, &native) {
            for side in &written_sides {
                let _ = remove_if_exists(side);
            }
            return Err(Error::io(&native, e));
        }

        self.finished = true;
        debug!(path = %self.target, size = self.written, "content published");
        Ok(StoredContent {
            path: self.target.clone(),
            size: self.written,
            checksums,
        })
    }

    fn persist_side_files(&self, checksums: &Checksums) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        if self.options.algorithms.is_empty() {
            return Ok(written);
        }

        for algorithm in ChecksumAlgorithm::ALL {
            let side = self.target.side_file(algorithm)?.to_native();
            let digest = self
                .options
                .algorithms
                .contains(&algorithm)
                .then(|| checksums.get(&algorithm))
                .flatten();

            let outcome = match digest {
                Some(digest) => {
                    let encoding = self.options.encodings.get(&algorithm).copied().unwrap_or_default();
                    write_atomic(&side, encoding.render(digest).as_bytes(), self.config).map(|_| {
                        written.push(side.clone());
                    })
                }
                // Stale digest from a previous upload with other algorithms
                None => remove_if_exists(&side).map(|_| ()),
            };
            if let Err(e) = outcome {
                for path in &written {
                    let _ = remove_if_exists(path);
                }
                return Err(e);
            }
        }
        Ok(written)
    }

    fn verify_side_file(&self, algorithm: ChecksumAlgorithm) -> Result<()> {
        let content =
            fs::read_to_string(&self.temp_path).map_err(|e| Error::io(&self.temp_path, e))?;
        let declared = checksum::parse_side_file(algorithm, &content).unwrap_or_default();

        let side_path = self.target.path().as_str();
        let Some((_, primary)) = ChecksumAlgorithm::split_side_file(side_path) else {
            return Ok(());
        };
        let primary_native = self.target.root().join(primary);
        if !primary_native.is_file() {
            return Ok(());
        }

        let actual = checksum::compute_file_checksums(&primary_native, &[algorithm])
            .map_err(|e| Error::io(&primary_native, e))?
            .remove(&algorithm)
            .unwrap_or_default();
        if declared != actual {
            return Err(Error::Integrity {
                path: self.target.to_string(),
                algorithm,
                expected: actual,
                actual: declared,
            });
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.file.take();
        match remove_if_exists(&self.temp_path) {
            Ok(true) => debug!(path = %self.target, "discarded unfinished upload"),
            Ok(false) => {}
            Err(e) => warn!(path = %self.target, error = %e, "failed to remove temp file"),
        }
    }
}

impl Write for ArtifactWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("writer already finished"))?;
        let n = file.write(buf)?;
        if let Some(digest) = self.digest.as_mut() {
            digest.update(&buf[..n]);
        }
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::NormalizedPath;

    fn repo_path(root: &Path, path: &str) -> RepositoryPath {
        RepositoryPath::new("storage0", "releases", NormalizedPath::new(path).unwrap(), root)
    }

    #[test]
    fn temp_files_are_hidden() {
        let temp = temp_path_for(Path::new("/x/lib.jar"));
        let name = temp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".lib.jar."));
        assert!(name.ends_with(".tmp"));
    }

    #[test]
    fn write_options_digest_includes_expected_algorithms() {
        let mut expected = Checksums::new();
        expected.insert(ChecksumAlgorithm::Sha256, "00".into());
        let options = WriteOptions::with_algorithms(&[ChecksumAlgorithm::Sha1]).expecting(expected);
        assert_eq!(
            options.digest_algorithms(),
            vec![ChecksumAlgorithm::Sha1, ChecksumAlgorithm::Sha256]
        );
    }

    #[test]
    fn list_files_skips_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/.trash")).unwrap();
        fs::write(dir.path().join("a/one"), "1").unwrap();
        fs::write(dir.path().join("a/.trash/two"), "2").unwrap();
        fs::write(dir.path().join("a/.hidden.tmp"), "3").unwrap();

        let files = list_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("a/one")]);
    }

    #[test]
    fn unfinished_writer_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let io = ArtifactIo::default();
        let path = repo_path(dir.path(), "a/b.bin");
        {
            let mut writer = io
                .open_write(&path, WriteOptions::with_algorithms(&[ChecksumAlgorithm::Sha1]))
                .unwrap();
            writer.write_all(b"partial").unwrap();
        }
        assert!(list_files(dir.path()).unwrap().is_empty());
        assert!(!io.locks().is_locked(&path.lock_key()));
    }

    #[test]
    fn prune_stops_at_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("x/y/z");
        fs::create_dir_all(&deep).unwrap();
        prune_empty_dirs(&deep, &dir.path().join("x"));
        assert!(!dir.path().join("x/y").exists());
        assert!(dir.path().join("x").exists());
    }
}
