//! Soft-delete and restore of repository content
//!
//! Each repository has a trash root at `{repositoryRoot}/.trash` that mirrors
//! the live layout. A logical path moves through
//! `PRESENT ⇄ TRASHED → PURGED`; content lives in at most one of the two
//! trees at any time.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checksum::ChecksumAlgorithm;
use crate::constants::ReservedPath;
use crate::io::{self, ArtifactIo};
use crate::path::{NormalizedPath, RepositoryPath};
use crate::{Error, Result};

/// Where the content of a logical path currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// Live content exists
    Present,
    /// Only a trash copy exists
    Trashed,
    /// Neither exists (never stored, or purged)
    Absent,
}

/// What a delete did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Moved into the trash
    Trashed,
    /// Permanently removed
    Purged,
}

/// Live state of one path captured before it is overwritten.
///
/// Restoring puts the captured content and side files back, or removes the
/// path again if nothing was live. Dropping the backup keeps the current
/// state and discards the captured copy.
#[derive(Debug)]
pub struct ContentBackup {
    path: RepositoryPath,
    location: PathBuf,
    had_content: bool,
    side_files: Vec<ChecksumAlgorithm>,
}

impl ContentBackup {
    pub fn path(&self) -> &RepositoryPath {
        &self.path
    }

    /// Whether the path held content when the backup was taken.
    pub fn had_content(&self) -> bool {
        self.had_content
    }

    fn saved(&self, name: &str) -> PathBuf {
        self.location.join(name)
    }
}

impl Drop for ContentBackup {
    fn drop(&mut self) {
        if self.location.exists() {
            if let Err(e) = fs::remove_dir_all(&self.location) {
                warn!(path = %self.path, error = %e, "failed to remove backup");
            }
        }
        if let Some(backup_root) = self.location.parent() {
            io::prune_empty_dirs(backup_root, self.path.root());
        }
    }
}

/// Performs trash transitions under the shared per-path write locks.
#[derive(Debug, Clone)]
pub struct TrashManager {
    io: ArtifactIo,
}

impl TrashManager {
    pub fn new(io: ArtifactIo) -> Self {
        Self { io }
    }

    /// Trash root of the repository whose content lives under `repository_root`.
    pub fn trash_root(repository_root: &Path) -> PathBuf {
        repository_root.join(ReservedPath::TrashDir.as_str())
    }

    pub fn state(&self, path: &RepositoryPath) -> ArtifactState {
        if path.exists() {
            ArtifactState::Present
        } else if path.trash_location().exists() {
            ArtifactState::Trashed
        } else {
            ArtifactState::Absent
        }
    }

    /// Delete `path`, into the trash unless `force` is set.
    ///
    /// Forced deletes also destroy any trash copy, so the path ends up purged.
    pub fn delete(&self, path: &RepositoryPath, force: bool) -> Result<DeleteOutcome> {
        reject_root(path)?;
        let _guard = self.io.lock(path)?;

        match (self.state(path), force) {
            (ArtifactState::Absent, _) => Err(Error::NotFound {
                path: path.to_string(),
            }),
            (ArtifactState::Trashed, false) => Err(Error::trash_state(
                path.to_string(),
                "already in trash; use a forced delete to purge it",
            )),
            (ArtifactState::Trashed, true) => {
                remove_tree(&path.trash_location())?;
                self.remove_trashed_side_files(path)?;
                info!(path = %path, "purged trash entry");
                Ok(DeleteOutcome::Purged)
            }
            (ArtifactState::Present, true) => {
                remove_tree(&path.to_native())?;
                self.io.remove_side_files(path)?;
                // A stale trash copy would otherwise resurrect on undelete
                remove_tree(&path.trash_location())?;
                self.remove_trashed_side_files(path)?;
                io::prune_empty_dirs(
                    path.to_native().parent().unwrap_or(path.root()),
                    path.root(),
                );
                info!(path = %path, "permanently deleted");
                Ok(DeleteOutcome::Purged)
            }
            (ArtifactState::Present, false) => {
                let source = path.to_native();
                let target = path.trash_location();
                move_replacing(&source, &target)?;
                for algorithm in ChecksumAlgorithm::ALL {
                    let side = path.side_file(algorithm)?;
                    let side_source = side.to_native();
                    if side_source.exists() {
                        move_replacing(&side_source, &side.trash_location())?;
                    } else {
                        // keep the trash copy consistent with what was live
                        io::remove_if_exists(&side.trash_location())?;
                    }
                }
                io::prune_empty_dirs(source.parent().unwrap_or(path.root()), path.root());
                info!(path = %path, "moved to trash");
                Ok(DeleteOutcome::Trashed)
            }
        }
    }

    /// Restore a trashed path.
    pub fn undelete(&self, path: &RepositoryPath) -> Result<()> {
        reject_root(path)?;
        let _guard = self.io.lock(path)?;

        match self.state(path) {
            ArtifactState::Present => Err(Error::trash_state(
                path.to_string(),
                "live content exists; nothing to restore",
            )),
            ArtifactState::Absent => Err(Error::trash_state(path.to_string(), "no trash entry")),
            ArtifactState::Trashed => {
                let trash_root = Self::trash_root(path.root());
                let source = path.trash_location();
                move_replacing(&source, &path.to_native())?;
                for algorithm in ChecksumAlgorithm::ALL {
                    let side = path.side_file(algorithm)?;
                    let side_source = side.trash_location();
                    if side_source.exists() {
                        move_replacing(&side_source, &side.to_native())?;
                    }
                }
                io::prune_empty_dirs(source.parent().unwrap_or(&trash_root), &trash_root);
                info!(path = %path, "restored from trash");
                Ok(())
            }
        }
    }

    /// Permanently empty the trash of one repository.
    ///
    /// Returns the number of files purged; an empty trash is a no-op.
    pub fn purge(&self, repository_root: &Path) -> Result<usize> {
        let trash_root = Self::trash_root(repository_root);
        if !trash_root.exists() {
            debug!(root = %repository_root.display(), "trash already empty");
            return Ok(0);
        }
        let count = io::list_files(&trash_root)?.len();
        remove_tree(&trash_root)?;
        info!(root = %repository_root.display(), files = count, "purged trash");
        Ok(count)
    }

    /// Restore everything in the trash of one repository.
    ///
    /// `bind` turns a repository-relative path into a [`RepositoryPath`] so
    /// each entry is restored under its own lock. Entries whose live path has
    /// been re-populated since are dropped from the trash. Returns the
    /// restored primary (non side-file) paths.
    pub fn restore_all<F>(&self, repository_root: &Path, bind: F) -> Result<Vec<NormalizedPath>>
    where
        F: Fn(NormalizedPath) -> RepositoryPath,
    {
        let trash_root = Self::trash_root(repository_root);
        let mut restored = Vec::new();

        for file in io::list_files(&trash_root)? {
            let relative = NormalizedPath::from_native(&trash_root, &file)?;
            if ChecksumAlgorithm::split_side_file(relative.as_str()).is_some() {
                // moved together with their primary below; orphans handled after
                continue;
            }
            let path = bind(relative.clone());
            match self.undelete(&path) {
                Ok(()) => restored.push(relative),
                Err(Error::TrashState { .. }) => {
                    warn!(path = %path, "live copy exists, dropping stale trash entry");
                    let _guard = self.io.lock(&path)?;
                    io::remove_if_exists(&path.trash_location())?;
                    self.remove_trashed_side_files(&path)?;
                }
                Err(e) => return Err(e),
            }
        }

        // Orphaned side files (primary uploaded and deleted separately)
        for file in io::list_files(&trash_root)? {
            let relative = NormalizedPath::from_native(&trash_root, &file)?;
            let target = relative.to_native(repository_root);
            if target.exists() {
                io::remove_if_exists(&file)?;
            } else {
                move_replacing(&file, &target)?;
            }
        }

        if trash_root.exists() {
            remove_tree(&trash_root)?;
        }
        info!(root = %repository_root.display(), restored = restored.len(), "restored trash");
        Ok(restored)
    }

    /// Capture the live content of a file path and its side files.
    ///
    /// Content is hard-linked where possible; writers publish by rename, so
    /// the captured copy survives a later overwrite.
    pub fn back_up(&self, path: &RepositoryPath) -> Result<ContentBackup> {
        reject_root(path)?;
        let _guard = self.io.lock(path)?;

        let location = path
            .root()
            .join(ReservedPath::BackupDir.as_str())
            .join(Uuid::new_v4().simple().to_string());
        let mut backup = ContentBackup {
            path: path.clone(),
            location,
            had_content: false,
            side_files: Vec::new(),
        };
        if !path.is_file() {
            return Ok(backup);
        }

        fs::create_dir_all(&backup.location).map_err(|e| Error::io(&backup.location, e))?;
        preserve(&path.to_native(), &backup.saved("content"))?;
        backup.had_content = true;
        for algorithm in ChecksumAlgorithm::ALL {
            let side = path.side_file(algorithm)?.to_native();
            if side.is_file() {
                preserve(&side, &backup.saved(algorithm.extension()))?;
                backup.side_files.push(algorithm);
            }
        }
        debug!(path = %path, "backed up live content");
        Ok(backup)
    }

    /// Put a path back into the state captured by `backup`.
    pub fn restore_backup(&self, backup: ContentBackup) -> Result<()> {
        let path = backup.path.clone();
        let _guard = self.io.lock(&path)?;

        if backup.had_content {
            move_replacing(&backup.saved("content"), &path.to_native())?;
        } else {
            remove_tree(&path.to_native())?;
        }
        for algorithm in ChecksumAlgorithm::ALL {
            let side = path.side_file(algorithm)?.to_native();
            if backup.side_files.contains(&algorithm) {
                move_replacing(&backup.saved(algorithm.extension()), &side)?;
            } else {
                io::remove_if_exists(&side)?;
            }
        }
        if !backup.had_content {
            io::prune_empty_dirs(path.to_native().parent().unwrap_or(path.root()), path.root());
        }
        info!(path = %path, restored = backup.had_content, "rolled back to backup");
        Ok(())
    }

    fn remove_trashed_side_files(&self, path: &RepositoryPath) -> Result<()> {
        for algorithm in ChecksumAlgorithm::ALL {
            io::remove_if_exists(&path.side_file(algorithm)?.trash_location())?;
        }
        Ok(())
    }
}

/// Remove a file or directory tree; missing paths are fine.
fn remove_tree(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path).map_err(|e| Error::io(path, e))
    } else {
        io::remove_if_exists(path).map(|_| ())
    }
}

/// Hard-link `source` to `target`, copying when links are unsupported.
fn preserve(source: &Path, target: &Path) -> Result<()> {
    if fs::hard_link(source, target).is_ok() {
        return Ok(());
    }
    fs::copy(source, target)
        .map(|_| ())
        .map_err(|e| Error::io(source, e))
}

fn reject_root(path: &RepositoryPath) -> Result<()> {
    if path.path().is_root() {
        return Err(Error::invalid_path(
            path.to_string(),
            "the repository root cannot be trashed or restored",
        ));
    }
    Ok(())
}

/// Move `source` onto `target`.
///
/// Files replace whatever is at `target`. Directories are merged into an
/// existing directory entry by entry, so only colliding files are replaced.
fn move_replacing(source: &Path, target: &Path) -> Result<()> {
    if source.is_dir() && target.is_dir() {
        let entries = fs::read_dir(source).map_err(|e| Error::io(source, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(source, e))?;
            move_replacing(&entry.path(), &target.join(entry.file_name()))?;
        }
        return fs::remove_dir(source).map_err(|e| Error::io(source, e));
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    if target.is_dir() {
        remove_tree(target)?;
    }
    fs::rename(source, target).map_err(|e| Error::io(source, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, TrashManager, RepositoryPath) {
        let dir = tempfile::tempdir().unwrap();
        let manager = TrashManager::new(ArtifactIo::default());
        let path = RepositoryPath::new(
            "storage0",
            "releases",
            NormalizedPath::new("a/b/file.bin").unwrap(),
            dir.path(),
        );
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(path.to_native(), "content").unwrap();
        fs::write(dir.path().join("a/b/file.bin.sha1"), "abc").unwrap();
        (dir, manager, path)
    }

    #[test]
    fn soft_delete_then_undelete_round_trips() {
        let (dir, manager, path) = setup();

        assert_eq!(manager.delete(&path, false).unwrap(), DeleteOutcome::Trashed);
        assert_eq!(manager.state(&path), ArtifactState::Trashed);
        assert!(dir.path().join(".trash/a/b/file.bin.sha1").exists());
        assert!(!dir.path().join("a").exists(), "empty parents are pruned");

        manager.undelete(&path).unwrap();
        assert_eq!(manager.state(&path), ArtifactState::Present);
        assert!(dir.path().join("a/b/file.bin.sha1").exists());
        assert!(!dir.path().join(".trash/a").exists());
    }

    #[test]
    fn forced_delete_bypasses_trash() {
        let (dir, manager, path) = setup();
        assert_eq!(manager.delete(&path, true).unwrap(), DeleteOutcome::Purged);
        assert_eq!(manager.state(&path), ArtifactState::Absent);
        assert!(!dir.path().join(".trash").exists());
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let (_dir, manager, path) = setup();
        assert!(matches!(manager.undelete(&path), Err(Error::TrashState { .. })));

        manager.delete(&path, false).unwrap();
        assert!(matches!(manager.delete(&path, false), Err(Error::TrashState { .. })));

        assert_eq!(manager.delete(&path, true).unwrap(), DeleteOutcome::Purged);
        assert!(matches!(manager.undelete(&path), Err(Error::TrashState { .. })));
        assert!(matches!(manager.delete(&path, true), Err(Error::NotFound { .. })));
    }

    #[test]
    fn directory_merge_keeps_unrelated_trash_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/a")).unwrap();
        fs::create_dir_all(dir.path().join("dst/a")).unwrap();
        fs::write(dir.path().join("src/a/new"), "new").unwrap();
        fs::write(dir.path().join("src/a/both"), "src").unwrap();
        fs::write(dir.path().join("dst/a/old"), "old").unwrap();
        fs::write(dir.path().join("dst/a/both"), "dst").unwrap();

        move_replacing(&dir.path().join("src"), &dir.path().join("dst")).unwrap();

        assert!(!dir.path().join("src").exists());
        assert_eq!(fs::read_to_string(dir.path().join("dst/a/new")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dir.path().join("dst/a/old")).unwrap(), "old");
        assert_eq!(fs::read_to_string(dir.path().join("dst/a/both")).unwrap(), "src");
    }

    #[test]
    fn root_is_never_trashed() {
        let (dir, manager, path) = setup();
        let root = path.with_path(NormalizedPath::root());
        assert!(matches!(manager.delete(&root, false), Err(Error::InvalidPath { .. })));
        assert!(matches!(manager.delete(&root, true), Err(Error::InvalidPath { .. })));
        assert!(matches!(manager.undelete(&root), Err(Error::InvalidPath { .. })));
        assert!(dir.path().join("a/b/file.bin").exists());
    }

    #[test]
    fn purge_is_idempotent() {
        let (dir, manager, path) = setup();
        manager.delete(&path, false).unwrap();
        assert_eq!(manager.purge(dir.path()).unwrap(), 2);
        assert_eq!(manager.purge(dir.path()).unwrap(), 0);
    }
}
