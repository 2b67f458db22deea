//! [`TestStorage`] builder for artifact-manager test scenarios.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use artifact_core::{ArtifactService, ArtifactServiceBuilder, Configuration, Repository, Storage};
use artifact_fs::{FileSystemProvider, LocalFileSystem};
use tempfile::TempDir;

/// A temporary base directory and the configuration describing it.
///
/// The directory is removed when the `TestStorage` is dropped, so keep it
/// alive for as long as any service built from it.
///
/// # Example
///
/// ```rust,no_run
/// use artifact_core::Repository;
/// use artifact_test_utils::TestStorage;
///
/// let storage = TestStorage::new().with_repository("storage0", Repository::hosted("releases", "maven2"));
/// let service = storage.service();
/// ```
pub struct TestStorage {
    temp_dir: TempDir,
    pub config: Configuration,
}

impl Default for TestStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TestStorage {
    /// Empty configuration rooted in a fresh temporary directory, without
    /// fsync.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Configuration::new(temp_dir.path().join("base"));
        config.io.fsync = false;
        Self { temp_dir, config }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Add `repository` to `storage_id`, creating the storage on first use.
    pub fn with_repository(mut self, storage_id: &str, repository: Repository) -> Self {
        match self.config.storages.iter_mut().find(|s| s.id == storage_id) {
            Some(storage) => storage.repositories.push(repository),
            None => self
                .config
                .storages
                .push(Storage::new(storage_id).with_repository(repository)),
        }
        self
    }

    /// Mutable access to a configured repository.
    pub fn repository_mut(&mut self, storage_id: &str, repository_id: &str) -> &mut Repository {
        self.config
            .storages
            .iter_mut()
            .find(|s| s.id == storage_id)
            .and_then(|s| s.repositories.iter_mut().find(|r| r.id == repository_id))
            .unwrap_or_else(|| panic!("no repository {}:{}", storage_id, repository_id))
    }

    pub fn file_system(&self) -> Arc<LocalFileSystem> {
        Arc::new(LocalFileSystem::new(&self.config.base_dir).unwrap())
    }

    pub fn repository_root(&self, storage_id: &str, repository_id: &str) -> PathBuf {
        self.file_system().repository_root(storage_id, repository_id)
    }

    /// Native location of a repository-relative path.
    pub fn path(&self, storage_id: &str, repository_id: &str, path: &str) -> PathBuf {
        self.repository_root(storage_id, repository_id).join(path)
    }

    pub fn builder(&self) -> ArtifactServiceBuilder {
        ArtifactService::builder(self.config.clone())
    }

    pub fn service(&self) -> ArtifactService {
        self.builder().build().unwrap()
    }

    /// Place a file directly on disk, bypassing the service.
    pub fn write_file(&self, storage_id: &str, repository_id: &str, path: &str, content: &[u8]) -> PathBuf {
        let target = self.path(storage_id, repository_id, path);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, content).unwrap();
        target
    }

    pub fn read_file(&self, storage_id: &str, repository_id: &str, path: &str) -> String {
        fs::read_to_string(self.path(storage_id, repository_id, path)).unwrap()
    }

    pub fn assert_file_exists(&self, storage_id: &str, repository_id: &str, path: &str) {
        let target = self.path(storage_id, repository_id, path);
        assert!(target.is_file(), "expected file {}", target.display());
    }

    pub fn assert_file_not_exists(&self, storage_id: &str, repository_id: &str, path: &str) {
        let target = self.path(storage_id, repository_id, path);
        assert!(!target.exists(), "expected no file at {}", target.display());
    }
}
