//! Per-layout storage façade
//!
//! A [`LayoutProvider`] composes one [`LayoutFormat`] with content I/O and
//! the trash, and adds what neither knows about on its own: repository
//! write rules, artifact records, events and metadata refresh.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::sync::Arc;

use artifact_fs::io as fs_io;
use artifact_fs::{
    ArtifactIo, ArtifactReader, ArtifactWriter, ChecksumAlgorithm, Checksums, ContentBackup,
    DeleteOutcome,
    NormalizedPath, RegeneratedChecksums, RepositoryPath, StoredContent, TrashManager,
    WriteOptions, write_atomic,
};
use artifact_layout::{
    ArtifactCoordinates, LayoutFormat, LayoutKind, MetadataReport, ParsedPath, PathClass,
};
use tracing::{debug, info, warn};

use crate::config::Repository;
use crate::entries::{ArtifactEntry, ArtifactEntryStore};
use crate::events::{ArtifactEvent, EventPublisher};
use crate::{Error, Result};

/// Side files regenerated per file, keyed by repository-relative path.
pub type ChecksumReport = BTreeMap<NormalizedPath, RegeneratedChecksums>;

#[derive(Debug)]
pub struct LayoutProvider {
    layout: Arc<dyn LayoutFormat>,
    io: ArtifactIo,
    trash: TrashManager,
    entries: Arc<dyn ArtifactEntryStore>,
    events: Arc<dyn EventPublisher>,
}

impl LayoutProvider {
    pub fn new(
        layout: Arc<dyn LayoutFormat>,
        io: ArtifactIo,
        entries: Arc<dyn ArtifactEntryStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            layout,
            trash: TrashManager::new(io.clone()),
            io,
            entries,
            events,
        }
    }

    pub fn layout(&self) -> &Arc<dyn LayoutFormat> {
        &self.layout
    }

    pub fn io(&self) -> &ArtifactIo {
        &self.io
    }

    pub fn trash(&self) -> &TrashManager {
        &self.trash
    }

    /// Side-file algorithms of `repository`.
    pub fn digest_algorithms(&self, repository: &Repository) -> Vec<ChecksumAlgorithm> {
        repository
            .checksum_algorithms
            .clone()
            .unwrap_or_else(|| self.layout.digest_algorithms().to_vec())
    }

    pub fn classify(&self, path: &RepositoryPath) -> Result<PathClass> {
        Ok(self.layout.classify(path.path())?)
    }

    /// Location of `coordinates` inside the repository `anchor` belongs to.
    pub fn artifact_path(
        &self,
        anchor: &RepositoryPath,
        coordinates: &ArtifactCoordinates,
    ) -> Result<RepositoryPath> {
        Ok(anchor.with_path(self.layout.to_path(coordinates)?))
    }

    fn ensure_in_service(repository: &Repository, path: &RepositoryPath) -> Result<()> {
        if repository.is_in_service() {
            Ok(())
        } else {
            Err(Error::RepositoryUnavailable {
                repository: format!("{}:{}", path.storage_id(), repository.id),
            })
        }
    }

    /// Check that `repository` accepts a write to `path`.
    pub fn validate_write(&self, repository: &Repository, path: &RepositoryPath) -> Result<PathClass> {
        Self::ensure_in_service(repository, path)?;
        let class = self.classify(path)?;

        if let PathClass::Artifact(ParsedPath {
            coordinates,
            side_file: None,
        }) = &class
        {
            // Only Maven tells snapshots from releases
            if coordinates.layout() == LayoutKind::Maven
                && !repository.policy.accepts(coordinates.is_snapshot())
            {
                return Err(Error::PolicyViolation {
                    repository: format!("{}:{}", path.storage_id(), repository.id),
                    policy: repository.policy.to_string(),
                    path: path.path().to_string(),
                });
            }
            if !repository.allows_redeployment && path.is_file() {
                return Err(Error::RedeploymentNotAllowed {
                    path: path.to_string(),
                });
            }
        }
        Ok(class)
    }

    pub fn open_read(&self, repository: &Repository, path: &RepositoryPath) -> Result<ArtifactReader> {
        Self::ensure_in_service(repository, path)?;
        let reader = self.io.open_read(path)?;
        self.entries
            .record_download(path.storage_id(), path.repository_id(), path.path());
        Ok(reader)
    }

    /// Open a checksummed writer; nothing is visible until it is committed.
    pub fn open_write(
        &self,
        repository: &Repository,
        path: &RepositoryPath,
        expected: Checksums,
    ) -> Result<ArtifactOutputStream> {
        let class = self.validate_write(repository, path)?;
        let options = match &class {
            PathClass::Artifact(ParsedPath {
                side_file: Some(algorithm),
                ..
            })
            | PathClass::Metadata {
                side_file: Some(algorithm),
            } => WriteOptions::default().side_file_of(*algorithm),
            _ => WriteOptions::with_algorithms(&self.digest_algorithms(repository))
                .with_encodings(self.layout.side_file_encodings()),
        };

        let writer = self.io.open_write(path, options.expecting(expected))?;
        let coordinates = match class {
            PathClass::Artifact(ParsedPath {
                coordinates,
                side_file: None,
            }) => Some(coordinates),
            _ => None,
        };
        // Checked again now that the writer holds the path lock
        if coordinates.is_some() && !repository.allows_redeployment && path.is_file() {
            return Err(Error::RedeploymentNotAllowed {
                path: path.to_string(),
            });
        }
        Ok(ArtifactOutputStream {
            writer,
            coordinates,
            entries: Arc::clone(&self.entries),
            events: Arc::clone(&self.events),
        })
    }

    pub fn contains_path(&self, path: &RepositoryPath) -> bool {
        path.is_file()
    }

    pub fn contains_artifact(
        &self,
        anchor: &RepositoryPath,
        coordinates: &ArtifactCoordinates,
    ) -> Result<bool> {
        Ok(self.artifact_path(anchor, coordinates)?.is_file())
    }

    /// Primary artifacts at or below `path`, in path order.
    pub fn artifacts_under(
        &self,
        path: &RepositoryPath,
    ) -> Result<Vec<(RepositoryPath, ArtifactCoordinates)>> {
        let mut found = Vec::new();
        for file in fs_io::list_files(&path.to_native())? {
            let relative = NormalizedPath::from_native(path.root(), &file)?;
            if let Ok(PathClass::Artifact(ParsedPath {
                coordinates,
                side_file: None,
            })) = self.layout.classify(&relative)
            {
                found.push((path.with_path(relative), coordinates));
            }
        }
        Ok(found)
    }

    /// Effective `force` for a delete, or why it is refused.
    fn check_delete(repository: &Repository, path: &RepositoryPath, force: bool) -> Result<bool> {
        if path.path().is_root() {
            return Err(artifact_fs::Error::invalid_path(
                path.to_string(),
                "the repository root cannot be deleted",
            )
            .into());
        }
        if !repository.allows_delete {
            return Err(Error::DeleteNotAllowed {
                path: path.to_string(),
                reason: "repository does not allow deletes".into(),
            });
        }
        let force = force || !repository.trash_enabled;
        if force && !repository.allows_force_deletion {
            return Err(Error::DeleteNotAllowed {
                path: path.to_string(),
                reason: "repository does not allow permanent deletes".into(),
            });
        }
        Ok(force)
    }

    /// Delete a file or directory, into the trash unless forced or the
    /// repository has no trash.
    pub fn delete(
        &self,
        repository: &Repository,
        path: &RepositoryPath,
        force: bool,
    ) -> Result<DeleteOutcome> {
        let force = Self::check_delete(repository, path, force)?;
        let artifacts = self.artifacts_under(path)?;
        let outcome = self.trash.delete(path, force)?;

        for (artifact, _) in &artifacts {
            self.entries
                .remove(artifact.storage_id(), artifact.repository_id(), artifact.path());
            self.events.publish(ArtifactEvent::Deleted {
                path: artifact.clone(),
                forced: outcome == DeleteOutcome::Purged,
            });
        }
        self.refresh_metadata(path, artifacts.iter().map(|(_, c)| c));
        info!(
            storage = path.storage_id(),
            repository = path.repository_id(),
            path = %path.path(),
            ?outcome,
            artifacts = artifacts.len(),
            "deleted"
        );
        Ok(outcome)
    }

    pub fn undelete(&self, repository: &Repository, path: &RepositoryPath) -> Result<()> {
        Self::ensure_in_service(repository, path)?;
        self.trash.undelete(path)?;
        let artifacts = self.artifacts_under(path)?;
        self.record_restored(&artifacts);
        self.refresh_metadata(path, artifacts.iter().map(|(_, c)| c));
        Ok(())
    }

    /// Empty the trash of the repository `anchor` belongs to.
    pub fn delete_trash(&self, anchor: &RepositoryPath) -> Result<usize> {
        Ok(self.trash.purge(anchor.root())?)
    }

    /// Restore the whole trash of the repository `anchor` belongs to.
    pub fn undelete_trash(&self, anchor: &RepositoryPath) -> Result<Vec<RepositoryPath>> {
        let restored: Vec<RepositoryPath> = self
            .trash
            .restore_all(anchor.root(), |p| anchor.with_path(p))?
            .into_iter()
            .map(|p| anchor.with_path(p))
            .collect();

        let mut artifacts = Vec::new();
        for path in &restored {
            if let Ok(PathClass::Artifact(ParsedPath {
                coordinates,
                side_file: None,
            })) = self.layout.classify(path.path())
            {
                artifacts.push((path.clone(), coordinates));
            }
        }
        self.record_restored(&artifacts);
        self.refresh_metadata(anchor, artifacts.iter().map(|(_, c)| c));
        Ok(restored)
    }

    fn record_restored(&self, artifacts: &[(RepositoryPath, ArtifactCoordinates)]) {
        for (path, coordinates) in artifacts {
            let size = match std::fs::metadata(path.to_native()) {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!(path = %path, error = %e, "restored artifact vanished");
                    continue;
                }
            };
            let checksums = self.io.stored_checksums(path).unwrap_or_default();
            self.entries.save(ArtifactEntry::new(
                path.storage_id(),
                path.repository_id(),
                path.path().clone(),
                coordinates.clone(),
                size,
                checksums,
            ));
            self.events
                .publish(ArtifactEvent::Undeleted { path: path.clone() });
        }
    }

    /// Rebuild the metadata summarizing `coordinates`; failures are logged.
    fn refresh_metadata<'a>(
        &self,
        anchor: &RepositoryPath,
        coordinates: impl Iterator<Item = &'a ArtifactCoordinates>,
    ) {
        let bases: BTreeSet<NormalizedPath> = coordinates
            .filter_map(|c| self.layout.metadata_base(c))
            .collect();
        for base in bases {
            if let Err(e) = self
                .layout
                .rebuild_metadata(anchor.root(), &base, self.io.config())
            {
                warn!(
                    storage = anchor.storage_id(),
                    repository = anchor.repository_id(),
                    base = %base,
                    error = %e,
                    "metadata rebuild failed"
                );
            }
        }
    }

    /// Copy a file or directory into `target`'s repository, verifying every
    /// file against its source side files. A failure puts every destination
    /// file already written back to what it held before the copy.
    pub fn copy_to(
        &self,
        source_repository: &Repository,
        source: &RepositoryPath,
        target: &LayoutProvider,
        target_repository: &Repository,
        destination: &RepositoryPath,
    ) -> Result<Vec<StoredContent>> {
        let (stored, _backups) =
            self.copy_with_backups(source_repository, source, target, target_repository, destination)?;
        info!(from = %source, to = %destination, files = stored.len(), "copied");
        Ok(stored)
    }

    fn copy_with_backups(
        &self,
        source_repository: &Repository,
        source: &RepositoryPath,
        target: &LayoutProvider,
        target_repository: &Repository,
        destination: &RepositoryPath,
    ) -> Result<(Vec<StoredContent>, Vec<ContentBackup>)> {
        Self::ensure_in_service(source_repository, source)?;
        if !source.exists() {
            return Err(Error::ArtifactNotFound {
                path: source.to_string(),
            });
        }

        let mut stored = Vec::new();
        let mut backups = Vec::new();
        for file in fs_io::list_files(&source.to_native())? {
            let relative = NormalizedPath::from_native(source.root(), &file)?;
            if ChecksumAlgorithm::split_side_file(relative.as_str()).is_some() {
                continue;
            }
            let from = source.with_path(relative.clone());
            let to = destination.with_path(rebase(&relative, source.path(), destination.path())?);
            let copied = target
                .trash
                .back_up(&to)
                .map_err(Error::from)
                .and_then(|backup| {
                    backups.push(backup);
                    self.copy_file(&from, target, target_repository, &to)
                });
            match copied {
                Ok(content) => stored.push(content),
                Err(e) => {
                    target.rollback(backups);
                    return Err(e);
                }
            }
        }
        Ok((stored, backups))
    }

    fn copy_file(
        &self,
        from: &RepositoryPath,
        target: &LayoutProvider,
        target_repository: &Repository,
        to: &RepositoryPath,
    ) -> Result<StoredContent> {
        let expected = self.io.stored_checksums(from)?;
        let mut reader = self.io.open_read(from)?;
        let mut output = target.open_write(target_repository, to, expected.clone())?;
        io::copy(&mut reader, &mut output).map_err(|e| artifact_fs::Error::io(from.to_native(), e))?;
        let content = output.commit()?;

        let generated = target.digest_algorithms(target_repository);
        let encodings = target.layout.side_file_encodings();
        for (algorithm, digest) in &expected {
            if !generated.contains(algorithm) {
                let rendered = encodings.get(algorithm).copied().unwrap_or_default().render(digest);
                write_atomic(
                    &to.side_file(*algorithm)?.to_native(),
                    rendered.as_bytes(),
                    target.io.config(),
                )?;
            }
        }
        debug!(from = %from, to = %to, size = content.size, "copied file");
        Ok(content)
    }

    /// Move a file or directory: copy, then permanently remove the source.
    /// If the source cannot be removed the copies are rolled back.
    pub fn move_to(
        &self,
        source_repository: &Repository,
        source: &RepositoryPath,
        target: &LayoutProvider,
        target_repository: &Repository,
        destination: &RepositoryPath,
    ) -> Result<Vec<StoredContent>> {
        Self::check_delete(source_repository, source, true)?;
        let (stored, backups) =
            self.copy_with_backups(source_repository, source, target, target_repository, destination)?;
        if let Err(e) = self.delete(source_repository, source, true) {
            warn!(from = %source, error = %e, "source removal failed, rolling back move");
            target.rollback(backups);
            return Err(e);
        }
        info!(from = %source, to = %destination, files = stored.len(), "moved");
        Ok(stored)
    }

    /// Return each backed-up destination to its prior state, newest first,
    /// and bring artifact records and listeners in line with it.
    fn rollback(&self, backups: Vec<ContentBackup>) {
        for backup in backups.into_iter().rev() {
            let path = backup.path().clone();
            let had_content = backup.had_content();
            if let Err(e) = self.trash.restore_backup(backup) {
                warn!(path = %path, error = %e, "rollback failed");
                continue;
            }

            let coordinates = match self.layout.classify(path.path()) {
                Ok(PathClass::Artifact(ParsedPath {
                    coordinates,
                    side_file: None,
                })) => coordinates,
                _ => continue,
            };
            if had_content {
                let size = std::fs::metadata(path.to_native()).map(|m| m.len()).unwrap_or(0);
                let checksums = self.io.stored_checksums(&path).unwrap_or_default();
                self.entries.save(ArtifactEntry::new(
                    path.storage_id(),
                    path.repository_id(),
                    path.path().clone(),
                    coordinates,
                    size,
                    checksums,
                ));
                self.events.publish(ArtifactEvent::Stored { path });
            } else if self
                .entries
                .remove(path.storage_id(), path.repository_id(), path.path())
                .is_some()
            {
                self.events.publish(ArtifactEvent::Deleted { path, forced: true });
            }
        }
    }

    /// Regenerate layout metadata below `base`.
    pub fn rebuild_metadata(
        &self,
        anchor: &RepositoryPath,
        base: &NormalizedPath,
    ) -> Result<MetadataReport> {
        Ok(self
            .layout
            .rebuild_metadata(anchor.root(), base, self.io.config())?)
    }

    /// Rewrite side files of every file under `directories`.
    pub fn regenerate_checksums(
        &self,
        repository: &Repository,
        directories: &[RepositoryPath],
        force: bool,
    ) -> Result<ChecksumReport> {
        let algorithms = self.digest_algorithms(repository);
        let encodings = self.layout.side_file_encodings();
        let mut report = ChecksumReport::new();
        for directory in directories {
            for file in fs_io::list_files(&directory.to_native())? {
                let relative = NormalizedPath::from_native(directory.root(), &file)?;
                if ChecksumAlgorithm::split_side_file(relative.as_str()).is_some() {
                    continue;
                }
                let outcome = self.io.regenerate_side_files(
                    &directory.with_path(relative.clone()),
                    &algorithms,
                    &encodings,
                    force,
                )?;
                report.insert(relative, outcome);
            }
        }
        info!(files = report.len(), force, "regenerated checksums");
        Ok(report)
    }
}

/// Place `path` (at or below `from`) at the same position below `to`.
fn rebase(path: &NormalizedPath, from: &NormalizedPath, to: &NormalizedPath) -> Result<NormalizedPath> {
    let rest = path
        .as_str()
        .strip_prefix(from.as_str())
        .unwrap_or(path.as_str())
        .trim_start_matches('/');
    if rest.is_empty() {
        return Ok(to.clone());
    }
    Ok(NormalizedPath::new(format!("{}/{}", to, rest))?)
}

/// Upload stream returned by [`LayoutProvider::open_write`].
///
/// Dropping it without [`ArtifactOutputStream::commit`] discards the upload.
#[derive(Debug)]
pub struct ArtifactOutputStream {
    writer: ArtifactWriter,
    coordinates: Option<ArtifactCoordinates>,
    entries: Arc<dyn ArtifactEntryStore>,
    events: Arc<dyn EventPublisher>,
}

impl ArtifactOutputStream {
    pub fn path(&self) -> &RepositoryPath {
        self.writer.path()
    }

    /// Coordinates of the primary artifact being written, `None` for side
    /// files and metadata.
    pub fn coordinates(&self) -> Option<&ArtifactCoordinates> {
        self.coordinates.as_ref()
    }

    /// Verify and publish the content, then record and announce it.
    pub fn commit(self) -> Result<StoredContent> {
        let Self {
            writer,
            coordinates,
            entries,
            events,
        } = self;
        let stored = writer.finish()?;

        if let Some(coordinates) = coordinates {
            let path = &stored.path;
            entries.save(ArtifactEntry::new(
                path.storage_id(),
                path.repository_id(),
                path.path().clone(),
                coordinates,
                stored.size,
                stored.checksums.clone(),
            ));
            events.publish(ArtifactEvent::Stored { path: path.clone() });
        }
        info!(
            storage = stored.path.storage_id(),
            repository = stored.path.repository_id(),
            path = %stored.path.path(),
            size = stored.size,
            "stored"
        );
        Ok(stored)
    }
}

impl Write for ArtifactOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
