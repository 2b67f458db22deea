use artifact_fs::{ArtifactReader, Checksums, DeleteOutcome, RepositoryPath};
use artifact_layout::CoordinateFields;

use super::{RepositoryProvider, SearchResult, StorageContext, search_local};
use crate::Result;
use crate::config::{Repository, RepositoryType};
use crate::layout_provider::ArtifactOutputStream;

/// Locally stored repositories; every call goes straight to the layout
/// provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostedRepositoryProvider;

impl RepositoryProvider for HostedRepositoryProvider {
    fn kind(&self) -> RepositoryType {
        RepositoryType::Hosted
    }

    fn get_input_stream(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
    ) -> Result<ArtifactReader> {
        ctx.layout_provider(repository)?.open_read(repository, path)
    }

    fn get_output_stream(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
        expected: Checksums,
    ) -> Result<ArtifactOutputStream> {
        ctx.layout_provider(repository)?
            .open_write(repository, path, expected)
    }

    fn contains(&self, ctx: &StorageContext, repository: &Repository, path: &RepositoryPath) -> Result<bool> {
        Ok(ctx.layout_provider(repository)?.contains_path(path))
    }

    fn search(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
        filters: &CoordinateFields,
    ) -> Result<Vec<SearchResult>> {
        search_local(ctx.layout_provider(repository)?, path, filters)
    }

    fn delete(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
        force: bool,
    ) -> Result<DeleteOutcome> {
        ctx.layout_provider(repository)?
            .delete(repository, path, force)
    }
}
