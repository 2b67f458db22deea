//! Collapsing concurrent calls for the same key into one execution
//!
//! The first caller for a key runs the work; callers arriving while it is
//! in flight wait and receive a clone of the same outcome. Once the call
//! completes the key is forgotten, so a failure is never cached.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tracing::debug;

use crate::{Error, Result};

type Outcome<V> = std::result::Result<V, Arc<Error>>;

struct Call<V> {
    outcome: Mutex<Option<Outcome<V>>>,
    done: Condvar,
}

impl<V: Clone> Call<V> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        })
    }

    fn complete(&self, outcome: Outcome<V>) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> Outcome<V> {
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = outcome.as_ref() {
                return outcome.clone();
            }
            outcome = self
                .done
                .wait(outcome)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

pub struct SingleFlight<K, V> {
    calls: Mutex<HashMap<K, Arc<Call<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> std::fmt::Debug for SingleFlight<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let in_flight = self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("SingleFlight")
            .field("in_flight", &in_flight)
            .finish()
    }
}

/// Completes the call even if the leader unwinds.
struct Leader<'a, K: Eq + Hash, V: Clone> {
    flight: &'a SingleFlight<K, V>,
    key: Option<K>,
    call: Arc<Call<V>>,
}

impl<K: Eq + Hash, V: Clone> Leader<'_, K, V> {
    fn finish(mut self, outcome: Outcome<V>) {
        self.release(outcome);
    }

    fn release(&mut self, outcome: Outcome<V>) {
        if let Some(key) = self.key.take() {
            self.flight
                .calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            self.call.complete(outcome);
        }
    }
}

impl<K: Eq + Hash, V: Clone> Drop for Leader<'_, K, V> {
    fn drop(&mut self) {
        self.release(Err(Arc::new(Error::Io(std::io::Error::other(
            "in-flight call was abandoned",
        )))));
    }
}

impl<K: Eq + Hash + Clone, V: Clone> SingleFlight<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run `work` for `key` unless a call for it is already in flight, in
    /// which case wait for that call's outcome instead.
    ///
    /// Failures are handed to every waiter as [`Error::Shared`].
    pub fn run<F>(&self, key: K, work: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(call) = calls.get(&key) {
            let call = Arc::clone(call);
            drop(calls);
            debug!("joining in-flight call");
            return call.wait().map_err(Error::Shared);
        }

        let call = Call::new();
        calls.insert(key.clone(), Arc::clone(&call));
        drop(calls);

        let leader = Leader {
            flight: self,
            key: Some(key),
            call,
        };
        let outcome = work().map_err(Arc::new);
        leader.finish(outcome.clone());
        outcome.map_err(Error::Shared)
    }
}
