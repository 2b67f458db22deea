//! Ordered aggregation of member repositories

use std::collections::HashSet;

use artifact_fs::{ArtifactReader, Checksums, DeleteOutcome, RepositoryPath};
use artifact_layout::CoordinateFields;
use tracing::{debug, trace};

use super::{RepositoryProvider, SearchResult, StorageContext};
use crate::config::{Repository, RepositoryRef, RepositoryType};
use crate::layout_provider::ArtifactOutputStream;
use crate::{Error, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct GroupRepositoryProvider;

impl GroupRepositoryProvider {
    /// In-service members of a group, in configured order.
    fn members<'a>(
        ctx: &'a StorageContext,
        group: &Repository,
        path: &RepositoryPath,
    ) -> Result<Vec<(RepositoryRef, &'a Repository)>> {
        let mut members = Vec::new();
        for member in group.members(path.storage_id()) {
            let repository = ctx.repository(&member.storage_id, &member.repository_id)?;
            if !repository.is_in_service() {
                trace!(member = %member, "skipping out-of-service member");
                continue;
            }
            members.push((member, repository));
        }
        Ok(members)
    }

    /// Member that receives writes: the deploy target, else the first
    /// hosted member.
    fn deploy_target<'a>(
        ctx: &'a StorageContext,
        group: &Repository,
        path: &RepositoryPath,
    ) -> Result<(RepositoryRef, &'a Repository)> {
        let configured = group
            .group
            .as_ref()
            .and_then(|g| g.deploy_target.as_deref())
            .map(|target| RepositoryRef::parse_member(path.storage_id(), target));

        let target = match configured {
            Some(target) => Some(target),
            None => {
                let mut first_hosted = None;
                for member in group.members(path.storage_id()) {
                    let repository = ctx.repository(&member.storage_id, &member.repository_id)?;
                    if repository.kind == RepositoryType::Hosted {
                        first_hosted = Some(member);
                        break;
                    }
                }
                first_hosted
            }
        };
        let target = target.ok_or_else(|| Error::NoDeployTarget {
            repository: format!("{}:{}", path.storage_id(), group.id),
        })?;
        let repository = ctx.repository(&target.storage_id, &target.repository_id)?;
        Ok((target, repository))
    }
}

impl RepositoryProvider for GroupRepositoryProvider {
    fn kind(&self) -> RepositoryType {
        RepositoryType::Group
    }

    fn get_input_stream(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
    ) -> Result<ArtifactReader> {
        let mut first_failure = None;
        for (member, config) in Self::members(ctx, repository, path)? {
            let member_path = ctx.member_path(&member, path);
            match ctx
                .provider(config.kind)
                .get_input_stream(ctx, config, &member_path)
            {
                Ok(reader) => {
                    debug!(group = %repository.id, member = %member, path = %path.path(), "resolved in member");
                    return Ok(reader);
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    debug!(member = %member, error = %e, "member read failed");
                    first_failure.get_or_insert(e);
                }
            }
        }
        Err(first_failure.unwrap_or_else(|| Error::ArtifactNotFound {
            path: path.to_string(),
        }))
    }

    fn get_output_stream(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
        expected: Checksums,
    ) -> Result<ArtifactOutputStream> {
        let (target, config) = Self::deploy_target(ctx, repository, path)?;
        debug!(group = %repository.id, target = %target, path = %path.path(), "deploying through group");
        ctx.provider(config.kind)
            .get_output_stream(ctx, config, &ctx.member_path(&target, path), expected)
    }

    fn contains(&self, ctx: &StorageContext, repository: &Repository, path: &RepositoryPath) -> Result<bool> {
        for (member, config) in Self::members(ctx, repository, path)? {
            if ctx
                .provider(config.kind)
                .contains(ctx, config, &ctx.member_path(&member, path))?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn search(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
        filters: &CoordinateFields,
    ) -> Result<Vec<SearchResult>> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for (member, config) in Self::members(ctx, repository, path)? {
            let found = ctx
                .provider(config.kind)
                .search(ctx, config, &ctx.member_path(&member, path), filters)?;
            results.extend(found.into_iter().filter(|r| seen.insert(r.path.clone())));
        }
        Ok(results)
    }

    fn delete(
        &self,
        _ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
        _force: bool,
    ) -> Result<DeleteOutcome> {
        Err(Error::unsupported(
            format!("{}:{}", path.storage_id(), repository.id),
            "delete",
        ))
    }
}
