//! Storage events and their delivery
//!
//! The core emits an [`ArtifactEvent`] for every committed primary artifact
//! write, delete and restore. Publication is synchronous; listeners that
//! need to do real work (the index) hand the event off to their own queue.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use artifact_fs::RepositoryPath;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactEvent {
    Stored { path: RepositoryPath },
    Deleted { path: RepositoryPath, forced: bool },
    Undeleted { path: RepositoryPath },
}

impl ArtifactEvent {
    pub fn path(&self) -> &RepositoryPath {
        match self {
            Self::Stored { path } | Self::Deleted { path, .. } | Self::Undeleted { path } => path,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Stored { .. } => "stored",
            Self::Deleted { .. } => "deleted",
            Self::Undeleted { .. } => "undeleted",
        }
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ArtifactEvent);
}

/// Sink the core publishes events into.
pub trait EventPublisher: Send + Sync + fmt::Debug {
    fn publish(&self, event: ArtifactEvent);
}

/// Fan-out publisher delivering every event to all subscribed listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: ArtifactEvent) {
        trace!(event = event.name(), path = %event.path(), "publishing");
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifact_fs::NormalizedPath;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<&'static str>>);

    impl EventListener for Collect {
        fn on_event(&self, event: &ArtifactEvent) {
            self.0.lock().unwrap().push(event.name());
        }
    }

    #[test]
    fn test_every_listener_receives_each_event() {
        let bus = EventBus::new();
        let first = Arc::new(Collect::default());
        let second = Arc::new(Collect::default());
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());

        let path = RepositoryPath::new("s", "r", NormalizedPath::new("a.bin").unwrap(), "/tmp/r");
        bus.publish(ArtifactEvent::Stored { path: path.clone() });
        bus.publish(ArtifactEvent::Deleted { path, forced: false });

        assert_eq!(*first.0.lock().unwrap(), vec!["stored", "deleted"]);
        assert_eq!(*second.0.lock().unwrap(), vec!["stored", "deleted"]);
    }
}
