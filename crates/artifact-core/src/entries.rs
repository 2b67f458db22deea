//! Artifact records kept by the external metadata store
//!
//! The core upserts an [`ArtifactEntry`] when a primary artifact is
//! committed or restored, removes it on delete and bumps its usage counters
//! on reads. [`InMemoryEntryStore`] backs tests and embedded use.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use artifact_fs::{Checksums, NormalizedPath};
use artifact_layout::ArtifactCoordinates;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub storage_id: String,
    pub repository_id: String,
    pub path: NormalizedPath,
    pub coordinates: ArtifactCoordinates,
    pub size: u64,
    pub checksums: Checksums,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub download_count: u64,
}

impl ArtifactEntry {
    pub fn new(
        storage_id: impl Into<String>,
        repository_id: impl Into<String>,
        path: NormalizedPath,
        coordinates: ArtifactCoordinates,
        size: u64,
        checksums: Checksums,
    ) -> Self {
        let now = Utc::now();
        Self {
            storage_id: storage_id.into(),
            repository_id: repository_id.into(),
            path,
            coordinates,
            size,
            checksums,
            created: now,
            last_updated: now,
            last_used: None,
            download_count: 0,
        }
    }
}

/// Persistence of artifact records, owned outside the core.
pub trait ArtifactEntryStore: Send + Sync + fmt::Debug {
    fn find(&self, storage_id: &str, repository_id: &str, path: &NormalizedPath) -> Option<ArtifactEntry>;

    fn save(&self, entry: ArtifactEntry);

    fn remove(&self, storage_id: &str, repository_id: &str, path: &NormalizedPath) -> Option<ArtifactEntry>;

    /// Count a download of an existing record.
    fn record_download(&self, storage_id: &str, repository_id: &str, path: &NormalizedPath) {
        if let Some(mut entry) = self.find(storage_id, repository_id, path) {
            entry.download_count += 1;
            entry.last_used = Some(Utc::now());
            self.save(entry);
        }
    }
}

type EntryKey = (String, String, NormalizedPath);

#[derive(Debug, Default)]
pub struct InMemoryEntryStore {
    entries: Mutex<BTreeMap<EntryKey, ArtifactEntry>>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records of one repository, ordered by path.
    pub fn entries_for(&self, storage_id: &str, repository_id: &str) -> Vec<ArtifactEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.storage_id == storage_id && e.repository_id == repository_id)
            .cloned()
            .collect()
    }

    fn key(storage_id: &str, repository_id: &str, path: &NormalizedPath) -> EntryKey {
        (storage_id.to_string(), repository_id.to_string(), path.clone())
    }
}

impl ArtifactEntryStore for InMemoryEntryStore {
    fn find(&self, storage_id: &str, repository_id: &str, path: &NormalizedPath) -> Option<ArtifactEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::key(storage_id, repository_id, path))
            .cloned()
    }

    fn save(&self, mut entry: ArtifactEntry) {
        let key = Self::key(&entry.storage_id, &entry.repository_id, &entry.path);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(&key) {
            entry.created = existing.created;
        }
        entries.insert(key, entry);
    }

    fn remove(&self, storage_id: &str, repository_id: &str, path: &NormalizedPath) -> Option<ArtifactEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&Self::key(storage_id, repository_id, path))
    }
}
