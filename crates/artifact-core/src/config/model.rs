//! Storage and repository configuration model

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use artifact_fs::{ChecksumAlgorithm, RobustnessConfig, validate_path_identifier};
use artifact_layout::LayoutRegistry;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

fn default_true() -> bool {
    true
}

fn default_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("artifact-manager")
}

/// Repository topology
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    #[default]
    Hosted,
    Proxy,
    Group,
}

impl fmt::Display for RepositoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hosted => write!(f, "hosted"),
            Self::Proxy => write!(f, "proxy"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// Which versions a repository accepts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryPolicy {
    Release,
    Snapshot,
    #[default]
    Mixed,
}

impl RepositoryPolicy {
    pub fn accepts(&self, snapshot: bool) -> bool {
        match self {
            Self::Release => !snapshot,
            Self::Snapshot => snapshot,
            Self::Mixed => true,
        }
    }
}

impl fmt::Display for RepositoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Release => write!(f, "release"),
            Self::Snapshot => write!(f, "snapshot"),
            Self::Mixed => write!(f, "mixed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepositoryStatus {
    #[default]
    InService,
    OutOfService,
}

fn default_max_connections() -> usize {
    8
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_elapsed_ms() -> u64 {
    30_000
}

/// Remote endpoint of a proxy repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    /// Size of the connection pool
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How long a fetch waits for a pooled connection
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Attempts after the first one for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on the total time spent retrying
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }

    /// Remote URL of a repository-relative path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), path)
    }
}

/// Members of a group repository
///
/// Members are repository ids of the same storage, or `storageId:repositoryId`
/// references to another storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub members: Vec<String>,
    /// Hosted member receiving writes; defaults to the first hosted member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_target: Option<String>,
}

/// Fully qualified `(storageId, repositoryId)` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub storage_id: String,
    pub repository_id: String,
}

impl RepositoryRef {
    pub fn new(storage_id: impl Into<String>, repository_id: impl Into<String>) -> Self {
        Self {
            storage_id: storage_id.into(),
            repository_id: repository_id.into(),
        }
    }

    /// Resolve a member reference written inside `storage_id`.
    pub fn parse_member(storage_id: &str, member: &str) -> Self {
        match member.split_once(':') {
            Some((storage, repository)) => Self::new(storage, repository),
            None => Self::new(storage_id, member),
        }
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.storage_id, self.repository_id)
    }
}

/// One repository of a storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    /// Layout alias, e.g. `maven2` or `nuget`
    pub layout: String,
    #[serde(rename = "type", default)]
    pub kind: RepositoryType,
    #[serde(default)]
    pub policy: RepositoryPolicy,
    #[serde(default)]
    pub status: RepositoryStatus,
    #[serde(default = "default_true")]
    pub allows_redeployment: bool,
    #[serde(default = "default_true")]
    pub allows_delete: bool,
    #[serde(default = "default_true")]
    pub allows_force_deletion: bool,
    #[serde(default = "default_true")]
    pub trash_enabled: bool,
    /// Overrides the layout's side-file algorithms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_algorithms: Option<Vec<ChecksumAlgorithm>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupConfig>,
}

impl Repository {
    fn base(id: impl Into<String>, layout: impl Into<String>, kind: RepositoryType) -> Self {
        Self {
            id: id.into(),
            layout: layout.into(),
            kind,
            policy: RepositoryPolicy::default(),
            status: RepositoryStatus::default(),
            allows_redeployment: true,
            allows_delete: true,
            allows_force_deletion: true,
            trash_enabled: true,
            checksum_algorithms: None,
            remote: None,
            group: None,
        }
    }

    pub fn hosted(id: impl Into<String>, layout: impl Into<String>) -> Self {
        Self::base(id, layout, RepositoryType::Hosted)
    }

    pub fn proxy(id: impl Into<String>, layout: impl Into<String>, remote: RemoteConfig) -> Self {
        Self {
            remote: Some(remote),
            ..Self::base(id, layout, RepositoryType::Proxy)
        }
    }

    pub fn group<S: Into<String>>(
        id: impl Into<String>,
        layout: impl Into<String>,
        members: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            group: Some(GroupConfig {
                members: members.into_iter().map(Into::into).collect(),
                deploy_target: None,
            }),
            ..Self::base(id, layout, RepositoryType::Group)
        }
    }

    pub fn with_policy(mut self, policy: RepositoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_deploy_target(mut self, member: impl Into<String>) -> Self {
        if let Some(group) = self.group.as_mut() {
            group.deploy_target = Some(member.into());
        }
        self
    }

    pub fn is_in_service(&self) -> bool {
        self.status == RepositoryStatus::InService
    }

    /// Member references of a group, resolved against `storage_id`.
    pub fn members(&self, storage_id: &str) -> Vec<RepositoryRef> {
        self.group
            .iter()
            .flat_map(|g| g.members.iter())
            .map(|m| RepositoryRef::parse_member(storage_id, m))
            .collect()
    }
}

/// Named, ordered collection of repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    pub id: String,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

impl Storage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            repositories: Vec::new(),
        }
    }

    pub fn with_repository(mut self, repository: Repository) -> Self {
        self.repositories.push(repository);
        self
    }

    pub fn repository(&self, id: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.id == id)
    }
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

/// Storage-wide I/O tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub fsync: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            fsync: true,
        }
    }
}

impl IoConfig {
    pub fn robustness(&self) -> RobustnessConfig {
        RobustnessConfig {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            enable_fsync: self.fsync,
        }
    }
}

/// The configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Directory holding `storages/`
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub storages: Vec<Storage>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            io: IoConfig::default(),
            storages: Vec::new(),
        }
    }
}

impl Configuration {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storages.push(storage);
        self
    }

    pub fn storage(&self, id: &str) -> Option<&Storage> {
        self.storages.iter().find(|s| s.id == id)
    }

    pub fn repository(&self, storage_id: &str, repository_id: &str) -> Option<&Repository> {
        self.storage(storage_id)?.repository(repository_id)
    }

    /// Every repository reference, in configuration order.
    pub fn repository_refs(&self) -> Vec<RepositoryRef> {
        self.storages
            .iter()
            .flat_map(|s| s.repositories.iter().map(|r| RepositoryRef::new(&s.id, &r.id)))
            .collect()
    }

    /// Groups that contain `storage_id:repository_id`, directly or through
    /// nested groups, innermost first.
    pub fn groups_containing(&self, storage_id: &str, repository_id: &str) -> Vec<RepositoryRef> {
        let mut found: Vec<RepositoryRef> = Vec::new();
        let mut frontier = vec![RepositoryRef::new(storage_id, repository_id)];

        while let Some(current) = frontier.pop() {
            for storage in &self.storages {
                for repository in &storage.repositories {
                    if repository.kind != RepositoryType::Group {
                        continue;
                    }
                    let group = RepositoryRef::new(&storage.id, &repository.id);
                    if found.contains(&group) {
                        continue;
                    }
                    if repository.members(&storage.id).contains(&current) {
                        found.push(group.clone());
                        frontier.push(group);
                    }
                }
            }
        }
        found
    }

    /// Check the document for consistency against the known layouts.
    pub fn validate(&self, layouts: &LayoutRegistry) -> Result<()> {
        let mut storage_ids = HashSet::new();
        for storage in &self.storages {
            validate_path_identifier(&storage.id)?;
            if !storage_ids.insert(storage.id.as_str()) {
                return Err(Error::invalid_config(format!("duplicate storage '{}'", storage.id)));
            }

            let mut repository_ids = HashSet::new();
            for repository in &storage.repositories {
                let name = RepositoryRef::new(&storage.id, &repository.id);
                validate_path_identifier(&repository.id)?;
                if !repository_ids.insert(repository.id.as_str()) {
                    return Err(Error::invalid_config(format!("duplicate repository '{}'", name)));
                }
                if !layouts.contains(&repository.layout) {
                    return Err(Error::invalid_config(format!(
                        "repository '{}' uses unknown layout '{}'",
                        name, repository.layout
                    )));
                }
                self.validate_topology(&storage.id, repository, layouts)?;
            }
        }

        for reference in self.repository_refs() {
            self.check_acyclic(&reference, &mut Vec::new())?;
        }
        Ok(())
    }

    fn validate_topology(
        &self,
        storage_id: &str,
        repository: &Repository,
        layouts: &LayoutRegistry,
    ) -> Result<()> {
        let name = RepositoryRef::new(storage_id, &repository.id);
        match repository.kind {
            RepositoryType::Hosted => Ok(()),
            RepositoryType::Proxy => match &repository.remote {
                Some(remote) if !remote.url.is_empty() && remote.max_connections > 0 => Ok(()),
                Some(_) => Err(Error::invalid_config(format!(
                    "proxy '{}' needs a remote url and at least one connection",
                    name
                ))),
                None => Err(Error::invalid_config(format!("proxy '{}' has no remote", name))),
            },
            RepositoryType::Group => {
                let members = repository.members(storage_id);
                if members.is_empty() {
                    return Err(Error::invalid_config(format!("group '{}' has no members", name)));
                }
                let own_layout = layouts.get(&repository.layout)?.kind();
                for member in &members {
                    let Some(target) = self.repository(&member.storage_id, &member.repository_id)
                    else {
                        return Err(Error::invalid_config(format!(
                            "group '{}' references unknown member '{}'",
                            name, member
                        )));
                    };
                    if layouts.get(&target.layout)?.kind() != own_layout {
                        return Err(Error::invalid_config(format!(
                            "group '{}' member '{}' uses a different layout",
                            name, member
                        )));
                    }
                }
                if let Some(target) = repository.group.as_ref().and_then(|g| g.deploy_target.as_ref()) {
                    let target = RepositoryRef::parse_member(storage_id, target);
                    let hosted = members.contains(&target)
                        && self
                            .repository(&target.storage_id, &target.repository_id)
                            .is_some_and(|r| r.kind == RepositoryType::Hosted);
                    if !hosted {
                        return Err(Error::invalid_config(format!(
                            "deploy target '{}' of group '{}' must be a hosted member",
                            target, name
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    fn check_acyclic(&self, current: &RepositoryRef, path: &mut Vec<RepositoryRef>) -> Result<()> {
        if path.contains(current) {
            let cycle: Vec<String> = path.iter().map(ToString::to_string).collect();
            return Err(Error::invalid_config(format!(
                "group cycle through {} -> {}",
                cycle.join(" -> "),
                current
            )));
        }
        let Some(repository) = self.repository(&current.storage_id, &current.repository_id) else {
            return Ok(());
        };
        path.push(current.clone());
        for member in repository.members(&current.storage_id) {
            self.check_acyclic(&member, path)?;
        }
        path.pop();
        Ok(())
    }

    /// Layout aliases in use.
    pub fn layouts_in_use(&self) -> BTreeSet<&str> {
        self.storages
            .iter()
            .flat_map(|s| s.repositories.iter().map(|r| r.layout.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Configuration {
        Configuration::new("/tmp/artifacts").with_storage(
            Storage::new("storage0")
                .with_repository(Repository::hosted("releases", "maven2"))
                .with_repository(Repository::hosted("snapshots", "maven2"))
                .with_repository(Repository::group("public", "maven2", ["releases", "snapshots"]))
                .with_repository(Repository::group("all", "maven2", ["public"])),
        )
    }

    #[test]
    fn test_valid_configuration() {
        sample().validate(&LayoutRegistry::with_builtins()).unwrap();
    }

    #[test]
    fn test_groups_containing_is_transitive() {
        let groups = sample().groups_containing("storage0", "releases");
        assert_eq!(
            groups,
            vec![
                RepositoryRef::new("storage0", "public"),
                RepositoryRef::new("storage0", "all")
            ]
        );
    }

    #[test]
    fn test_cycle_is_rejected() {
        let config = Configuration::new("/tmp").with_storage(
            Storage::new("s")
                .with_repository(Repository::group("a", "raw", ["b"]))
                .with_repository(Repository::group("b", "raw", ["a"])),
        );
        let err = config.validate(&LayoutRegistry::with_builtins()).unwrap_err();
        assert!(err.to_string().contains("cycle"), "{}", err);
    }

    #[test]
    fn test_member_reference_across_storages() {
        assert_eq!(
            RepositoryRef::parse_member("s0", "s1:central"),
            RepositoryRef::new("s1", "central")
        );
        assert_eq!(
            RepositoryRef::parse_member("s0", "central"),
            RepositoryRef::new("s0", "central")
        );
    }

    #[test]
    fn test_policy_acceptance() {
        assert!(RepositoryPolicy::Release.accepts(false));
        assert!(!RepositoryPolicy::Release.accepts(true));
        assert!(!RepositoryPolicy::Snapshot.accepts(false));
        assert!(RepositoryPolicy::Mixed.accepts(true));
    }
}
