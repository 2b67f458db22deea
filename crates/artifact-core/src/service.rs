//! Operation surface of the storage core
//!
//! [`ArtifactService`] resolves `(storageId, repositoryId, path)` requests
//! against the configuration and dispatches them to the provider of the
//! repository's type. It owns the event bus, the index coordinator and one
//! [`LayoutProvider`] per layout in use.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;

use artifact_fs::{
    ArtifactIo, ArtifactReader, Checksums, DeleteOutcome, FileSystemProvider, LocalFileSystem,
    NormalizedPath, PathLocks, RepositoryPath, StoredContent,
};
use artifact_layout::{CoordinateFields, LayoutRegistry, MetadataReport};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{Configuration, ConfigurationSource, Repository, RepositoryRef, RepositoryType};
use crate::entries::{ArtifactEntryStore, InMemoryEntryStore};
use crate::events::{EventBus, EventListener, EventPublisher};
use crate::index::{IndexCoordinator, IndexRebuildReport};
use crate::layout_provider::{ArtifactOutputStream, ChecksumReport, LayoutProvider};
use crate::remote::{NoRemoteClient, RemoteClient};
use crate::repository::{
    CacheState, ProxyRepositoryProvider, RepositoryProvider, SearchResult, StorageContext,
};
use crate::{Error, Result};

/// One path inside one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub storage_id: String,
    pub repository_id: String,
    pub path: String,
}

impl ArtifactLocation {
    pub fn new(
        storage_id: impl Into<String>,
        repository_id: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            storage_id: storage_id.into(),
            repository_id: repository_id.into(),
            path: path.into(),
        }
    }
}

/// Repositories a trash operation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrashScope {
    All,
    Storage(String),
    Repository(RepositoryRef),
}

impl TrashScope {
    fn repositories(&self, config: &Configuration) -> Result<Vec<RepositoryRef>> {
        let refs = match self {
            Self::All => config.repository_refs(),
            Self::Storage(storage_id) => {
                let storage = config.storage(storage_id).ok_or_else(|| Error::StorageNotFound {
                    storage_id: storage_id.clone(),
                })?;
                storage
                    .repositories
                    .iter()
                    .map(|r| RepositoryRef::new(&storage.id, &r.id))
                    .collect()
            }
            Self::Repository(repository) => vec![repository.clone()],
        };
        Ok(refs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub storage_id: String,
    /// Every non-group repository of the storage when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_id: Option<String>,
    /// Directory to search below; the repository root when empty
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub filters: CoordinateFields,
}

impl SearchRequest {
    pub fn new(storage_id: impl Into<String>) -> Self {
        Self {
            storage_id: storage_id.into(),
            ..Self::default()
        }
    }

    pub fn in_repository(mut self, repository_id: impl Into<String>) -> Self {
        self.repository_id = Some(repository_id.into());
        self
    }

    pub fn below(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }
}

pub struct ArtifactServiceBuilder {
    config: Arc<dyn ConfigurationSource>,
    fs: Option<Arc<dyn FileSystemProvider>>,
    layouts: LayoutRegistry,
    entries: Option<Arc<dyn ArtifactEntryStore>>,
    remote: Option<Arc<dyn RemoteClient>>,
    listeners: Vec<Arc<dyn EventListener>>,
}

impl ArtifactServiceBuilder {
    /// Storage placement; defaults to the configured `base_dir`.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemProvider>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Layout registry; defaults to the built-in layouts.
    pub fn layouts(mut self, layouts: LayoutRegistry) -> Self {
        self.layouts = layouts;
        self
    }

    pub fn entry_store(mut self, entries: Arc<dyn ArtifactEntryStore>) -> Self {
        self.entries = Some(entries);
        self
    }

    pub fn remote_client(mut self, remote: Arc<dyn RemoteClient>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validate the configuration and start the index coordinator.
    pub fn build(self) -> Result<ArtifactService> {
        let configuration = self.config.configuration();
        configuration.validate(&self.layouts)?;

        let fs: Arc<dyn FileSystemProvider> = match self.fs {
            Some(fs) => fs,
            None => Arc::new(LocalFileSystem::new(&configuration.base_dir)?),
        };
        let entries = self
            .entries
            .unwrap_or_else(|| Arc::new(InMemoryEntryStore::new()));
        let robustness = configuration.io.robustness();

        let events = EventBus::new();
        let index = IndexCoordinator::start(
            Arc::clone(&self.config),
            Arc::clone(&fs),
            self.layouts.clone(),
            robustness,
        )?;
        events.subscribe(Arc::clone(&index) as Arc<dyn EventListener>);
        for listener in self.listeners {
            events.subscribe(listener);
        }

        let io = ArtifactIo::with_locks(robustness, PathLocks::new());
        let publisher: Arc<dyn EventPublisher> = Arc::clone(&events) as Arc<dyn EventPublisher>;
        let mut layouts = HashMap::new();
        for alias in configuration.layouts_in_use() {
            let provider = LayoutProvider::new(
                self.layouts.get(alias)?,
                io.clone(),
                Arc::clone(&entries),
                Arc::clone(&publisher),
            );
            layouts.insert(alias.to_string(), Arc::new(provider));
        }

        let remote = self
            .remote
            .unwrap_or_else(|| Arc::new(NoRemoteClient));
        let context = StorageContext::new(
            Arc::clone(&self.config),
            fs,
            layouts,
            ProxyRepositoryProvider::new(remote),
        );
        info!(
            storages = configuration.storages.len(),
            layouts = configuration.layouts_in_use().len(),
            "artifact service ready"
        );
        Ok(ArtifactService {
            context,
            events,
            index,
            entries,
        })
    }
}

#[derive(Debug)]
pub struct ArtifactService {
    context: StorageContext,
    events: Arc<EventBus>,
    index: Arc<IndexCoordinator>,
    entries: Arc<dyn ArtifactEntryStore>,
}

impl ArtifactService {
    pub fn builder<C: ConfigurationSource + 'static>(config: C) -> ArtifactServiceBuilder {
        ArtifactServiceBuilder {
            config: Arc::new(config),
            fs: None,
            layouts: LayoutRegistry::with_builtins(),
            entries: None,
            remote: None,
            listeners: Vec::new(),
        }
    }

    pub fn context(&self) -> &StorageContext {
        &self.context
    }

    pub fn configuration(&self) -> &Configuration {
        self.context.config().configuration()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn index(&self) -> &Arc<IndexCoordinator> {
        &self.index
    }

    pub fn entries(&self) -> &Arc<dyn ArtifactEntryStore> {
        &self.entries
    }

    fn resolve(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> Result<(&Repository, RepositoryPath)> {
        let repository = self.context.repository(storage_id, repository_id)?;
        let path = self.context.resolve(storage_id, repository_id, path)?;
        Ok((repository, path))
    }

    fn provider(&self, repository: &Repository) -> &dyn RepositoryProvider {
        self.context.provider(repository.kind)
    }

    /// Layout provider of a repository that keeps content locally.
    fn local_layout(&self, repository: &Repository, path: &RepositoryPath, operation: &str) -> Result<&Arc<LayoutProvider>> {
        if repository.kind == RepositoryType::Group {
            return Err(Error::unsupported(
                format!("{}:{}", path.storage_id(), repository.id),
                operation,
            ));
        }
        self.context.layout_provider(repository)
    }

    pub fn get_input_stream(&self, storage_id: &str, repository_id: &str, path: &str) -> Result<ArtifactReader> {
        let (repository, path) = self.resolve(storage_id, repository_id, path)?;
        debug!(storage = storage_id, repository = repository_id, path = %path.path(), "read");
        self.provider(repository)
            .get_input_stream(&self.context, repository, &path)
    }

    /// Open an upload; it becomes visible only when committed.
    pub fn get_output_stream(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
        expected: Checksums,
    ) -> Result<ArtifactOutputStream> {
        let (repository, path) = self.resolve(storage_id, repository_id, path)?;
        debug!(storage = storage_id, repository = repository_id, path = %path.path(), "write");
        self.provider(repository)
            .get_output_stream(&self.context, repository, &path, expected)
    }

    /// Upload everything `content` yields and commit it.
    pub fn store(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
        mut content: impl Read,
        expected: Checksums,
    ) -> Result<StoredContent> {
        let mut output = self.get_output_stream(storage_id, repository_id, path, expected)?;
        io::copy(&mut content, &mut output)?;
        output.commit()
    }

    pub fn contains(&self, storage_id: &str, repository_id: &str, path: &str) -> Result<bool> {
        let (repository, path) = self.resolve(storage_id, repository_id, path)?;
        self.provider(repository)
            .contains(&self.context, repository, &path)
    }

    pub fn delete(&self, storage_id: &str, repository_id: &str, path: &str, force: bool) -> Result<DeleteOutcome> {
        let (repository, path) = self.resolve(storage_id, repository_id, path)?;
        self.provider(repository)
            .delete(&self.context, repository, &path, force)
    }

    pub fn undelete(&self, storage_id: &str, repository_id: &str, path: &str) -> Result<()> {
        let (repository, path) = self.resolve(storage_id, repository_id, path)?;
        self.local_layout(repository, &path, "undelete")?
            .undelete(repository, &path)
    }

    /// Empty the trash of every repository in `scope`; returns how many
    /// entries were purged.
    pub fn delete_trash(&self, scope: &TrashScope) -> Result<usize> {
        let mut purged = 0;
        for reference in scope.repositories(self.configuration())? {
            let (repository, anchor) = self.resolve(&reference.storage_id, &reference.repository_id, "")?;
            if repository.kind == RepositoryType::Group {
                continue;
            }
            purged += self
                .context
                .layout_provider(repository)?
                .delete_trash(&anchor)?;
        }
        info!(?scope, purged, "trash emptied");
        Ok(purged)
    }

    /// Restore the trash of every repository in `scope`.
    pub fn undelete_trash(&self, scope: &TrashScope) -> Result<Vec<RepositoryPath>> {
        let mut restored = Vec::new();
        for reference in scope.repositories(self.configuration())? {
            let (repository, anchor) = self.resolve(&reference.storage_id, &reference.repository_id, "")?;
            if repository.kind == RepositoryType::Group || !repository.is_in_service() {
                continue;
            }
            restored.extend(
                self.context
                    .layout_provider(repository)?
                    .undelete_trash(&anchor)?,
            );
        }
        info!(?scope, restored = restored.len(), "trash restored");
        Ok(restored)
    }

    fn transfer_endpoints(
        &self,
        source: &ArtifactLocation,
        destination: &ArtifactLocation,
        operation: &str,
    ) -> Result<Transfer<'_>> {
        let (source_repository, source_path) =
            self.resolve(&source.storage_id, &source.repository_id, &source.path)?;
        let (target_repository, target_path) =
            self.resolve(&destination.storage_id, &destination.repository_id, &destination.path)?;
        if target_repository.kind != RepositoryType::Hosted {
            return Err(Error::unsupported(
                format!("{}:{}", destination.storage_id, destination.repository_id),
                operation,
            ));
        }
        Ok(Transfer {
            source_layout: self.local_layout(source_repository, &source_path, operation)?,
            source_repository,
            source_path,
            target_layout: self.context.layout_provider(target_repository)?,
            target_repository,
            target_path,
        })
    }

    /// Copy a file or directory into a hosted repository.
    pub fn copy(&self, source: &ArtifactLocation, destination: &ArtifactLocation) -> Result<Vec<StoredContent>> {
        let t = self.transfer_endpoints(source, destination, "copy")?;
        t.source_layout.copy_to(
            t.source_repository,
            &t.source_path,
            t.target_layout,
            t.target_repository,
            &t.target_path,
        )
    }

    /// Move a file or directory into a hosted repository.
    pub fn move_artifact(&self, source: &ArtifactLocation, destination: &ArtifactLocation) -> Result<Vec<StoredContent>> {
        let t = self.transfer_endpoints(source, destination, "move")?;
        t.source_layout.move_to(
            t.source_repository,
            &t.source_path,
            t.target_layout,
            t.target_repository,
            &t.target_path,
        )
    }

    pub fn rebuild_metadata(&self, storage_id: &str, repository_id: &str, base: &str) -> Result<MetadataReport> {
        let (repository, anchor) = self.resolve(storage_id, repository_id, base)?;
        let report = self
            .local_layout(repository, &anchor, "rebuild metadata")?
            .rebuild_metadata(&anchor, anchor.path())?;
        info!(
            storage = storage_id,
            repository = repository_id,
            base = %anchor.path(),
            written = report.written.len(),
            removed = report.removed.len(),
            "metadata rebuilt"
        );
        Ok(report)
    }

    pub fn rebuild_indexes(
        &self,
        storage_id: &str,
        repository_id: &str,
        base: &str,
        force: bool,
    ) -> Result<IndexRebuildReport> {
        self.context.repository(storage_id, repository_id)?;
        let base = NormalizedPath::new(base)?;
        self.index.rebuild(storage_id, repository_id, &base, force)
    }

    /// Rewrite side files below each directory; existing ones are kept
    /// unless `force` is set.
    pub fn regenerate_checksums(
        &self,
        storage_id: &str,
        repository_id: &str,
        directories: &[&str],
        force: bool,
    ) -> Result<ChecksumReport> {
        let repository = self.context.repository(storage_id, repository_id)?;
        let directories = directories
            .iter()
            .map(|d| self.context.resolve(storage_id, repository_id, d))
            .collect::<Result<Vec<_>>>()?;
        let anchor = self.context.resolve(storage_id, repository_id, "")?;
        self.local_layout(repository, &anchor, "regenerate checksums")?
            .regenerate_checksums(repository, &directories, force)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let repository_ids: Vec<String> = match &request.repository_id {
            Some(id) => vec![id.clone()],
            None => self
                .configuration()
                .storage(&request.storage_id)
                .ok_or_else(|| Error::StorageNotFound {
                    storage_id: request.storage_id.clone(),
                })?
                .repositories
                .iter()
                .filter(|r| r.kind != RepositoryType::Group)
                .map(|r| r.id.clone())
                .collect(),
        };

        let mut results = Vec::new();
        for repository_id in repository_ids {
            let (repository, base) = self.resolve(&request.storage_id, &repository_id, &request.base)?;
            results.extend(
                self.provider(repository)
                    .search(&self.context, repository, &base, &request.filters)?,
            );
        }
        debug!(storage = %request.storage_id, results = results.len(), "search");
        Ok(results)
    }

    /// Cache state of a path in a proxy repository.
    pub fn proxy_state(&self, storage_id: &str, repository_id: &str, path: &str) -> Result<CacheState> {
        let (repository, path) = self.resolve(storage_id, repository_id, path)?;
        if repository.kind != RepositoryType::Proxy {
            return Err(Error::unsupported(
                format!("{}:{}", storage_id, repository_id),
                "proxy state",
            ));
        }
        Ok(self.context.proxy().state(&path))
    }
}

struct Transfer<'a> {
    source_layout: &'a LayoutProvider,
    source_repository: &'a Repository,
    source_path: RepositoryPath,
    target_layout: &'a LayoutProvider,
    target_repository: &'a Repository,
    target_path: RepositoryPath,
}
