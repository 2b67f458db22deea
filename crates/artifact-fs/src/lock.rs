//! Keyed mutual exclusion for logical artifact paths
//!
//! The file locks taken by [`crate::io::write_atomic`] only guard a single
//! temp file. Artifact writes span the content, its side files and the final
//! rename, so they are serialized per `(storageId, repositoryId, path)` with
//! this in-process lock table. Unrelated keys never contend.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::{Error, Result};

/// Identity of a logical artifact path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey {
    pub storage_id: String,
    pub repository_id: String,
    pub path: String,
}

impl LockKey {
    pub fn new(storage_id: &str, repository_id: &str, path: &str) -> Self {
        Self {
            storage_id: storage_id.to_string(),
            repository_id: repository_id.to_string(),
            path: path.to_string(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.storage_id, self.repository_id, self.path)
    }
}

/// Table of currently held path locks.
#[derive(Debug, Default)]
pub struct PathLocks {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl PathLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block until `key` is free, then hold it until the guard drops.
    ///
    /// Waiters queue on a condition variable; after `timeout` the call fails
    /// with [`Error::LockTimeout`].
    pub fn acquire(self: &Arc<Self>, key: LockKey, timeout: Duration) -> Result<PathLockGuard> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        while held.contains(&key) {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::LockTimeout {
                    path: key.to_string(),
                    timeout,
                });
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }

        held.insert(key.clone());
        trace!(key = %key, "path lock acquired");
        Ok(PathLockGuard {
            locks: Arc::clone(self),
            key,
        })
    }

    /// Whether `key` is currently held.
    pub fn is_locked(&self, key: &LockKey) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn release(&self, key: &LockKey) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(key);
        drop(held);
        self.released.notify_all();
        trace!(key = %key, "path lock released");
    }
}

/// Holds a path lock; releases it on drop.
#[derive(Debug)]
pub struct PathLockGuard {
    locks: Arc<PathLocks>,
    key: LockKey,
}

impl PathLockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}
