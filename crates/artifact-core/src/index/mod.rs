//! Per-repository artifact index
//!
//! Each repository keeps a JSON document at `.index/index.json` under its
//! root listing every primary artifact with its coordinates. Hosted and
//! proxy indexes are ordered by path. A group index is the ordered,
//! path-deduplicated union of its members' indexes, first member winning.

mod coordinator;

pub use coordinator::{IndexCoordinator, IndexRebuildReport};

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use artifact_fs::constants::INDEX_FILE;
use artifact_fs::{NormalizedPath, ReservedPath, RobustnessConfig, write_atomic};
use artifact_layout::{ArtifactCoordinates, CoordinateFields};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RepositoryRef;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: NormalizedPath,
    pub coordinates: ArtifactCoordinates,
    pub size: u64,
    /// Modification time of the file when it was indexed
    pub modified: DateTime<Utc>,
    /// Member repository holding the artifact, set in group indexes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl IndexEntry {
    pub fn matches(&self, filters: &CoordinateFields) -> bool {
        matches_filters(&self.path, &self.coordinates, filters)
    }
}

/// Whether every filter matches a coordinate field, or the pseudo-fields
/// `layout` and `path`.
pub fn matches_filters(
    path: &NormalizedPath,
    coordinates: &ArtifactCoordinates,
    filters: &CoordinateFields,
) -> bool {
    let fields = coordinates.fields();
    filters.iter().all(|(name, expected)| match name.as_str() {
        "layout" => coordinates.layout().as_str() == expected,
        "path" => path.as_str() == expected,
        _ => fields.get(name) == Some(expected),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryIndex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entries: Vec<IndexEntry>,
}

impl RepositoryIndex {
    pub fn location(repository_root: &Path) -> PathBuf {
        repository_root
            .join(ReservedPath::IndexDir.as_str())
            .join(INDEX_FILE)
    }

    /// Read the index of a repository; a missing document is an empty index.
    pub fn load(repository_root: &Path) -> Result<Self> {
        let location = Self::location(repository_root);
        match fs::read(&location) {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(artifact_fs::Error::io(&location, e).into()),
        }
    }

    pub fn save(&self, repository_root: &Path, config: RobustnessConfig) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)?;
        write_atomic(&Self::location(repository_root), &content, config)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &NormalizedPath) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| &e.path == path)
    }

    /// Insert or replace the entry for its path, keeping path order.
    /// Returns whether anything changed.
    pub fn upsert(&mut self, entry: IndexEntry) -> bool {
        match self.entries.binary_search_by(|e| e.path.cmp(&entry.path)) {
            Ok(i) if self.entries[i] == entry => return false,
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
        self.last_updated = Some(Utc::now());
        true
    }

    pub fn remove(&mut self, path: &NormalizedPath) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.path != path);
        let changed = self.entries.len() != before;
        if changed {
            self.last_updated = Some(Utc::now());
        }
        changed
    }

    /// Drop entries at or below `base` that `keep` rejects; returns how many.
    pub fn prune_under(&mut self, base: &NormalizedPath, keep: impl Fn(&IndexEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| !e.path.starts_with(base) || keep(e));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.last_updated = Some(Utc::now());
        }
        removed
    }

    pub fn query(&self, filters: &CoordinateFields) -> Vec<&IndexEntry> {
        self.entries.iter().filter(|e| e.matches(filters)).collect()
    }

    /// Ordered union of member indexes; the first member listing a path wins.
    pub fn union(members: impl IntoIterator<Item = (RepositoryRef, RepositoryIndex)>) -> Self {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for (member, index) in members {
            for mut entry in index.entries {
                if !seen.insert(entry.path.clone()) {
                    continue;
                }
                if entry.source.is_none() {
                    entry.source = Some(member.to_string());
                }
                entries.push(entry);
            }
        }
        Self {
            last_updated: Some(Utc::now()),
            entries,
        }
    }
}
