//! Remote endpoints of proxy repositories
//!
//! The transport is a collaborator behind [`RemoteClient`]. Every call goes
//! through a per-repository [`ConnectionPool`] so a slow remote cannot take
//! more than its configured share of connections.

use std::fmt;
use std::io::Read;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use artifact_fs::Checksums;
use tracing::trace;

use crate::{Error, Result};

/// Streamed remote content plus the digests the remote declared for it.
pub struct RemoteResponse {
    pub body: Box<dyn Read + Send>,
    pub checksums: Checksums,
}

impl RemoteResponse {
    pub fn new(body: impl Read + Send + 'static) -> Self {
        Self {
            body: Box::new(body),
            checksums: Checksums::new(),
        }
    }

    pub fn with_checksums(mut self, checksums: Checksums) -> Self {
        self.checksums = checksums;
        self
    }
}

impl fmt::Debug for RemoteResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteResponse")
            .field("checksums", &self.checksums)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("not found on remote")]
    NotFound,

    /// Worth retrying (connection reset, 5xx, timeout)
    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("remote failure: {0}")]
    Fatal(String),
}

pub trait RemoteClient: Send + Sync + fmt::Debug {
    fn fetch(&self, url: &str) -> std::result::Result<RemoteResponse, RemoteError>;
}

/// Client used when none is configured; every fetch fails permanently.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemoteClient;

impl RemoteClient for NoRemoteClient {
    fn fetch(&self, url: &str) -> std::result::Result<RemoteResponse, RemoteError> {
        Err(RemoteError::Fatal(format!("no remote client configured for {}", url)))
    }
}

/// Bounded set of connections to one remote.
#[derive(Debug)]
pub struct ConnectionPool {
    remote: String,
    capacity: usize,
    timeout: Duration,
    in_use: Mutex<usize>,
    released: Condvar,
}

impl ConnectionPool {
    pub fn new(remote: impl Into<String>, capacity: usize, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            remote: remote.into(),
            capacity: capacity.max(1),
            timeout,
            in_use: Mutex::new(0),
            released: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        *self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to the pool timeout for a free connection.
    pub fn acquire(self: &Arc<Self>) -> Result<PoolPermit> {
        let deadline = Instant::now() + self.timeout;
        let mut in_use = self.in_use.lock().unwrap_or_else(PoisonError::into_inner);
        while *in_use >= self.capacity {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::PoolTimeout {
                    remote: self.remote.clone(),
                    timeout: self.timeout,
                });
            }
            let (guard, _) = self
                .released
                .wait_timeout(in_use, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            in_use = guard;
        }
        *in_use += 1;
        trace!(remote = %self.remote, in_use = *in_use, "connection acquired");
        Ok(PoolPermit {
            pool: Arc::clone(self),
        })
    }

    fn release(&self) {
        let mut in_use = self.in_use.lock().unwrap_or_else(PoisonError::into_inner);
        *in_use = in_use.saturating_sub(1);
        drop(in_use);
        self.released.notify_one();
    }
}

/// A checked-out connection; returned to the pool on drop.
#[derive(Debug)]
pub struct PoolPermit {
    pool: Arc<ConnectionPool>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.pool.release();
    }
}
