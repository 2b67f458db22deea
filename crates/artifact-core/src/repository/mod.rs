//! Repository topologies
//!
//! Every configured repository is served by the [`RepositoryProvider`] of
//! its type: hosted repositories store content locally, proxies cache a
//! remote on demand and groups aggregate ordered members. Providers are
//! stateless with respect to configuration and receive the
//! [`StorageContext`] on every call, so groups can dispatch to their
//! members' providers.

mod group;
mod hosted;
mod proxy;

pub use group::GroupRepositoryProvider;
pub use hosted::HostedRepositoryProvider;
pub use proxy::{CacheState, FAILED_STATE_CAPACITY, ProxyRepositoryProvider};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use artifact_fs::{ArtifactReader, Checksums, DeleteOutcome, FileSystemProvider, NormalizedPath, RepositoryPath};
use artifact_layout::{ArtifactCoordinates, CoordinateFields};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigurationSource, Repository, RepositoryRef, RepositoryType};
use crate::index::matches_filters;
use crate::layout_provider::{ArtifactOutputStream, LayoutProvider};
use crate::{Error, Result};

/// One artifact found by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Repository physically holding the artifact
    pub repository: RepositoryRef,
    pub path: NormalizedPath,
    pub coordinates: ArtifactCoordinates,
}

/// Content operations every repository type implements.
pub trait RepositoryProvider: Send + Sync + fmt::Debug {
    fn kind(&self) -> RepositoryType;

    fn get_input_stream(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
    ) -> Result<ArtifactReader>;

    fn get_output_stream(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
        expected: Checksums,
    ) -> Result<ArtifactOutputStream>;

    fn contains(&self, ctx: &StorageContext, repository: &Repository, path: &RepositoryPath) -> Result<bool>;

    /// Primary artifacts at or below `path` matching every filter.
    fn search(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
        filters: &CoordinateFields,
    ) -> Result<Vec<SearchResult>>;

    fn delete(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
        force: bool,
    ) -> Result<DeleteOutcome>;
}

/// Everything a provider needs to resolve repositories and reach storage.
#[derive(Debug)]
pub struct StorageContext {
    config: Arc<dyn ConfigurationSource>,
    fs: Arc<dyn FileSystemProvider>,
    layouts: HashMap<String, Arc<LayoutProvider>>,
    hosted: HostedRepositoryProvider,
    proxy: ProxyRepositoryProvider,
    group: GroupRepositoryProvider,
}

impl StorageContext {
    pub fn new(
        config: Arc<dyn ConfigurationSource>,
        fs: Arc<dyn FileSystemProvider>,
        layouts: HashMap<String, Arc<LayoutProvider>>,
        proxy: ProxyRepositoryProvider,
    ) -> Self {
        Self {
            config,
            fs,
            layouts,
            hosted: HostedRepositoryProvider,
            proxy,
            group: GroupRepositoryProvider,
        }
    }

    pub fn config(&self) -> &Arc<dyn ConfigurationSource> {
        &self.config
    }

    pub fn fs(&self) -> &Arc<dyn FileSystemProvider> {
        &self.fs
    }

    pub fn repository(&self, storage_id: &str, repository_id: &str) -> Result<&Repository> {
        self.config.repository(storage_id, repository_id)
    }

    pub fn layout_provider(&self, repository: &Repository) -> Result<&Arc<LayoutProvider>> {
        self.layouts.get(&repository.layout).ok_or_else(|| {
            Error::invalid_config(format!(
                "no layout provider for '{}' (repository {})",
                repository.layout, repository.id
            ))
        })
    }

    pub fn resolve(&self, storage_id: &str, repository_id: &str, path: &str) -> Result<RepositoryPath> {
        Ok(self.fs.resolve(storage_id, repository_id, path)?)
    }

    /// `path` relocated into `member`.
    pub fn member_path(&self, member: &RepositoryRef, path: &RepositoryPath) -> RepositoryPath {
        RepositoryPath::new(
            &member.storage_id,
            &member.repository_id,
            path.path().clone(),
            self.fs
                .repository_root(&member.storage_id, &member.repository_id),
        )
    }

    pub fn provider(&self, kind: RepositoryType) -> &dyn RepositoryProvider {
        match kind {
            RepositoryType::Hosted => &self.hosted,
            RepositoryType::Proxy => &self.proxy,
            RepositoryType::Group => &self.group,
        }
    }

    pub fn proxy(&self) -> &ProxyRepositoryProvider {
        &self.proxy
    }
}

/// Search the local files of a hosted or proxy repository.
pub(crate) fn search_local(
    layout: &LayoutProvider,
    path: &RepositoryPath,
    filters: &CoordinateFields,
) -> Result<Vec<SearchResult>> {
    let repository = RepositoryRef::new(path.storage_id(), path.repository_id());
    Ok(layout
        .artifacts_under(path)?
        .into_iter()
        .filter(|(found, coordinates)| matches_filters(found.path(), coordinates, filters))
        .map(|(found, coordinates)| SearchResult {
            repository: repository.clone(),
            path: found.path().clone(),
            coordinates,
        })
        .collect())
}
