//! [`RecordingListener`] for asserting on published events.

use std::sync::{Arc, Mutex};

use artifact_core::{ArtifactEvent, EventListener};

#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ArtifactEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every event received, in publication order.
    pub fn events(&self) -> Vec<ArtifactEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Names of the events received for `path` (`storage:repository/path`).
    pub fn names_for(&self, path: &str) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.path().to_string() == path)
            .map(ArtifactEvent::name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &ArtifactEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
