//! Caching proxy of a remote repository
//!
//! A read that misses the local cache fetches the remote through the
//! repository's connection pool, streams the body into content I/O with
//! the remote's declared digests as expected checksums and then serves the
//! cached copy. Concurrent misses on one path share a single fetch.
//! Nothing is cached when a fetch fails.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use artifact_fs::{ArtifactReader, Checksums, DeleteOutcome, LockKey, RepositoryPath};
use artifact_layout::CoordinateFields;
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{RepositoryProvider, SearchResult, StorageContext, search_local};
use crate::config::{RemoteConfig, Repository, RepositoryRef, RepositoryType};
use crate::layout_provider::{ArtifactOutputStream, LayoutProvider};
use crate::remote::{ConnectionPool, RemoteClient, RemoteError, RemoteResponse};
use crate::single_flight::SingleFlight;
use crate::{Error, Result};

/// Failed fetches remembered per provider; older failures are forgotten first.
pub const FAILED_STATE_CAPACITY: usize = 256;

/// Cache state of one proxied path.
///
/// `Cached` is read from disk. `Failed` is not sticky: the next read
/// fetches again, and only the most recent failures are remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Absent,
    Fetching,
    Cached,
    Failed,
}

/// Why one fetch attempt failed.
#[derive(Debug)]
enum Failure {
    Transient(String),
    Fatal(String),
    Error(Error),
}

impl Failure {
    fn into_error(self, url: &str, attempts: u32) -> Error {
        match self {
            Self::Transient(message) | Self::Fatal(message) => Error::RemoteFetch {
                url: url.to_string(),
                attempts,
                message,
            },
            Self::Error(e) => e,
        }
    }
}

pub struct ProxyRepositoryProvider {
    client: Arc<dyn RemoteClient>,
    pools: Mutex<HashMap<RepositoryRef, Arc<ConnectionPool>>>,
    flights: SingleFlight<LockKey, ()>,
    states: Mutex<FetchStates>,
}

/// In-flight and recently failed fetches.
#[derive(Debug, Default)]
struct FetchStates {
    fetching: HashSet<LockKey>,
    failed: VecDeque<LockKey>,
}

impl FetchStates {
    fn start(&mut self, key: &LockKey) {
        self.failed.retain(|k| k != key);
        self.fetching.insert(key.clone());
    }

    fn finish(&mut self, key: &LockKey, succeeded: bool) {
        self.fetching.remove(key);
        if !succeeded {
            if self.failed.len() >= FAILED_STATE_CAPACITY {
                self.failed.pop_front();
            }
            self.failed.push_back(key.clone());
        }
    }

    fn get(&self, key: &LockKey) -> Option<CacheState> {
        if self.fetching.contains(key) {
            Some(CacheState::Fetching)
        } else if self.failed.contains(key) {
            Some(CacheState::Failed)
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        self.fetching.len() + self.failed.len()
    }
}

impl ProxyRepositoryProvider {
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self {
            client,
            pools: Mutex::new(HashMap::new()),
            flights: SingleFlight::new(),
            states: Mutex::new(FetchStates::default()),
        }
    }

    /// Cache state of `path`.
    pub fn state(&self, path: &RepositoryPath) -> CacheState {
        let recorded = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&path.lock_key());
        match recorded {
            Some(CacheState::Fetching) => CacheState::Fetching,
            _ if path.is_file() => CacheState::Cached,
            Some(CacheState::Failed) => CacheState::Failed,
            _ => CacheState::Absent,
        }
    }

    /// Connection pool of a proxy repository, created on first use.
    pub fn pool(&self, repository: RepositoryRef, remote: &RemoteConfig) -> Arc<ConnectionPool> {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(pools.entry(repository).or_insert_with(|| {
            ConnectionPool::new(&remote.url, remote.max_connections, remote.acquire_timeout())
        }))
    }

    /// Paths with a remembered fetch state.
    pub fn tracked_paths(&self) -> usize {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Forget the state of `path` and everything below it.
    fn invalidate(&self, path: &RepositoryPath) {
        let key = path.lock_key();
        let prefix = format!("{}/", key.path);
        let covered = |k: &LockKey| {
            k.storage_id == key.storage_id
                && k.repository_id == key.repository_id
                && (key.path.is_empty() || k.path == key.path || k.path.starts_with(&prefix))
        };
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.failed.retain(|k| !covered(k));
    }

    /// Populate the cache for `path`, retrying transient failures.
    fn fetch(&self, layout: &LayoutProvider, repository: &Repository, path: &RepositoryPath) -> Result<()> {
        if path.is_file() {
            return Ok(());
        }
        let remote = repository.remote.as_ref().ok_or_else(|| {
            Error::invalid_config(format!("proxy repository {} has no remote", repository.id))
        })?;
        let pool = self.pool(
            RepositoryRef::new(path.storage_id(), path.repository_id()),
            remote,
        );
        let url = remote.url_for(path.path().as_str());

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(remote.initial_backoff())
            .with_max_elapsed_time(Some(remote.max_elapsed()))
            .build();
        let mut attempts = 0u32;
        let outcome = backoff::retry(policy, || {
            attempts += 1;
            self.fetch_once(layout, repository, path, &pool, &url)
                .map_err(|failure| match failure {
                    Failure::Transient(message) if attempts <= remote.max_retries => {
                        debug!(url = %url, attempt = attempts, error = %message, "fetch failed, retrying");
                        backoff::Error::transient(Failure::Transient(message))
                    }
                    other => backoff::Error::permanent(other),
                })
        });

        match outcome {
            Ok(()) => {
                info!(url = %url, path = %path, attempts, "cached remote artifact");
                Ok(())
            }
            Err(backoff::Error::Permanent(failure))
            | Err(backoff::Error::Transient { err: failure, .. }) => {
                Err(failure.into_error(&url, attempts))
            }
        }
    }

    fn fetch_once(
        &self,
        layout: &LayoutProvider,
        repository: &Repository,
        path: &RepositoryPath,
        pool: &Arc<ConnectionPool>,
        url: &str,
    ) -> std::result::Result<(), Failure> {
        let _permit = pool.acquire().map_err(Failure::Error)?;
        let RemoteResponse {
            mut body,
            checksums,
        } = self.client.fetch(url).map_err(|e| match e {
            RemoteError::NotFound => Failure::Error(Error::ArtifactNotFound {
                path: path.to_string(),
            }),
            RemoteError::Transient(message) => Failure::Transient(message),
            RemoteError::Fatal(message) => Failure::Fatal(message),
        })?;

        let mut output = layout
            .open_write(repository, path, checksums)
            .map_err(Failure::Error)?;
        // An interrupted body drops the writer, which discards the partial copy
        io::copy(&mut body, &mut output).map_err(|e| Failure::Transient(e.to_string()))?;
        output.commit().map_err(Failure::Error)?;
        Ok(())
    }
}

impl std::fmt::Debug for ProxyRepositoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRepositoryProvider")
            .field("client", &self.client)
            .field("flights", &self.flights)
            .finish_non_exhaustive()
    }
}

impl RepositoryProvider for ProxyRepositoryProvider {
    fn kind(&self) -> RepositoryType {
        RepositoryType::Proxy
    }

    fn get_input_stream(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
    ) -> Result<ArtifactReader> {
        let layout = ctx.layout_provider(repository)?;
        if !repository.is_in_service() {
            return Err(Error::RepositoryUnavailable {
                repository: format!("{}:{}", path.storage_id(), repository.id),
            });
        }
        // Reject paths the layout cannot address before touching the remote
        layout.classify(path)?;

        let key = path.lock_key();
        if !path.is_file() {
            let outcome = self.flights.run(key.clone(), || {
                self.states
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .start(&key);
                let outcome = self.fetch(layout, repository, path);
                self.states
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .finish(&key, outcome.is_ok());
                outcome
            });
            if let Err(e) = outcome {
                if !e.is_not_found() {
                    warn!(path = %path, error = %e, "remote fetch failed");
                }
                return Err(e);
            }
        }
        layout.open_read(repository, path)
    }

    fn get_output_stream(
        &self,
        _ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
        _expected: Checksums,
    ) -> Result<ArtifactOutputStream> {
        Err(Error::unsupported(
            format!("{}:{}", path.storage_id(), repository.id),
            "write",
        ))
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

    /// Evict the cached copy; the next read fetches it again.
    fn delete(
        &self,
        ctx: &StorageContext,
        repository: &Repository,
        path: &RepositoryPath,
        force: bool,
    ) -> Result<DeleteOutcome> {
        let outcome = ctx
            .layout_provider(repository)?
            .delete(repository, path, force)?;
        self.invalidate(path);
        Ok(outcome)
    }
}
