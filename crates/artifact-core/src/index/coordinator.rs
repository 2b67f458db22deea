//! Background maintenance of repository indexes
//!
//! The coordinator listens to storage events and applies them on a single
//! worker thread, so index documents are never written concurrently and
//! writers never wait for indexing. Every change to a repository index is
//! propagated to the indexes of the groups containing it.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use artifact_fs::io as fs_io;
use artifact_fs::{FileSystemProvider, NormalizedPath, RepositoryPath, RobustnessConfig};
use artifact_layout::{CoordinateFields, LayoutFormat, LayoutRegistry, ParsedPath, PathClass};
use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use super::{IndexEntry, RepositoryIndex};
use crate::config::{ConfigurationSource, Repository, RepositoryRef, RepositoryType};
use crate::events::{ArtifactEvent, EventListener};
use crate::Result;

/// Outcome of [`IndexCoordinator::rebuild`], summed over group members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexRebuildReport {
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl IndexRebuildReport {
    fn merge(&mut self, other: IndexRebuildReport) {
        self.updated += other.updated;
        self.removed += other.removed;
        self.unchanged += other.unchanged;
    }
}

#[derive(Debug)]
enum IndexTask {
    Upsert(RepositoryPath),
    Remove(RepositoryPath),
}

impl IndexTask {
    fn path(&self) -> &RepositoryPath {
        match self {
            Self::Upsert(path) | Self::Remove(path) => path,
        }
    }
}

struct Shared {
    config: Arc<dyn ConfigurationSource>,
    fs: Arc<dyn FileSystemProvider>,
    layouts: LayoutRegistry,
    robustness: RobustnessConfig,
    /// Serializes reads-modify-writes of index documents
    documents: Mutex<()>,
    pending: Mutex<usize>,
    idle: Condvar,
    applied: AtomicU64,
    failures: AtomicU64,
}

pub struct IndexCoordinator {
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<IndexTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IndexCoordinator {
    /// Start the coordinator and its worker thread.
    pub fn start(
        config: Arc<dyn ConfigurationSource>,
        fs: Arc<dyn FileSystemProvider>,
        layouts: LayoutRegistry,
        robustness: RobustnessConfig,
    ) -> Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            config,
            fs,
            layouts,
            robustness,
            documents: Mutex::new(()),
            pending: Mutex::new(0),
            idle: Condvar::new(),
            applied: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
        let (sender, receiver) = mpsc::channel();
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("artifact-index".into())
                .spawn(move || run_worker(&shared, receiver))?
        };
        debug!("index coordinator started");
        Ok(Arc::new(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Index changes applied so far, by events and rebuilds.
    pub fn updates_applied(&self) -> u64 {
        self.shared.applied.load(Ordering::SeqCst)
    }

    /// Events whose application failed.
    pub fn failures(&self) -> u64 {
        self.shared.failures.load(Ordering::SeqCst)
    }

    /// Block until every queued event has been applied. Returns `false` if
    /// `timeout` passed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .idle
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            pending = guard;
        }
        true
    }

    /// Re-index the repository (and for groups, every member) below `base`.
    ///
    /// Without `force` only entries whose file changed size or modification
    /// time are rewritten.
    pub fn rebuild(
        &self,
        storage_id: &str,
        repository_id: &str,
        base: &NormalizedPath,
        force: bool,
    ) -> Result<IndexRebuildReport> {
        let report = self.shared.rebuild(storage_id, repository_id, base, force)?;
        let changed = report.updated + report.removed;
        self.shared.applied.fetch_add(changed as u64, Ordering::SeqCst);
        info!(
            storage = storage_id,
            repository = repository_id,
            base = %base,
            force,
            updated = report.updated,
            removed = report.removed,
            unchanged = report.unchanged,
            "index rebuilt"
        );
        Ok(report)
    }

    /// Index entries of a repository matching every filter.
    pub fn query(
        &self,
        storage_id: &str,
        repository_id: &str,
        filters: &CoordinateFields,
    ) -> Result<Vec<IndexEntry>> {
        self.shared.config.repository(storage_id, repository_id)?;
        let root = self.shared.fs.repository_root(storage_id, repository_id);
        let index = RepositoryIndex::load(&root)?;
        Ok(index.query(filters).into_iter().cloned().collect())
    }

    /// Stop accepting events and wait for the queue to drain.
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("index worker panicked");
            }
        }
    }

    fn enqueue(&self, task: IndexTask) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            debug!(path = %task.path(), "index coordinator stopped, event dropped");
            return;
        };
        *self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        if let Err(mpsc::SendError(task)) = sender.send(task) {
            warn!(path = %task.path(), "index worker gone, event dropped");
            self.shared.task_done();
        }
    }
}

impl EventListener for IndexCoordinator {
    fn on_event(&self, event: &ArtifactEvent) {
        let task = match event {
            ArtifactEvent::Stored { path } | ArtifactEvent::Undeleted { path } => {
                IndexTask::Upsert(path.clone())
            }
            ArtifactEvent::Deleted { path, .. } => IndexTask::Remove(path.clone()),
        };
        self.enqueue(task);
    }
}

impl Drop for IndexCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for IndexCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexCoordinator")
            .field("applied", &self.updates_applied())
            .field("failures", &self.failures())
            .finish_non_exhaustive()
    }
}

fn run_worker(shared: &Shared, receiver: Receiver<IndexTask>) {
    for task in receiver {
        match shared.apply(&task) {
            Ok(true) => {
                shared.applied.fetch_add(1, Ordering::SeqCst);
            }
            Ok(false) => trace!(path = %task.path(), "index already current"),
            Err(e) => {
                shared.failures.fetch_add(1, Ordering::SeqCst);
                warn!(path = %task.path(), error = %e, "index update failed");
            }
        }
        shared.task_done();
    }
    debug!("index worker stopped");
}

fn modified_at(path: &Path) -> Result<(u64, DateTime<Utc>)> {
    let metadata = fs::metadata(path).map_err(|e| artifact_fs::Error::io(path, e))?;
    let modified = metadata
        .modified()
        .map_err(|e| artifact_fs::Error::io(path, e))?;
    Ok((metadata.len(), DateTime::<Utc>::from(modified)))
}

impl Shared {
    fn task_done(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    fn layout_of(&self, repository: &Repository) -> Result<Arc<dyn LayoutFormat>> {
        Ok(self.layouts.get(&repository.layout)?)
    }

    /// Apply one event to its repository and every group above it.
    fn apply(&self, task: &IndexTask) -> Result<bool> {
        let path = task.path();
        let (storage_id, repository_id) = (path.storage_id(), path.repository_id());
        let repository = self.config.repository(storage_id, repository_id)?;
        let _documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);

        let mut index = RepositoryIndex::load(path.root())?;
        let changed = match task {
            IndexTask::Upsert(path) => {
                let layout = self.layout_of(repository)?;
                match self.entry_for(layout.as_ref(), path.root(), path.path())? {
                    Some(entry) => index.upsert(entry),
                    None => return Ok(false),
                }
            }
            IndexTask::Remove(path) => index.remove(path.path()),
        };
        if !changed {
            return Ok(false);
        }
        index.save(path.root(), self.robustness)?;
        trace!(path = %path, "index updated");
        self.propagate(storage_id, repository_id)?;
        Ok(true)
    }

    /// Index entry for a primary artifact file, `None` for anything else.
    fn entry_for(
        &self,
        layout: &dyn LayoutFormat,
        root: &Path,
        path: &NormalizedPath,
    ) -> Result<Option<IndexEntry>> {
        let coordinates = match layout.classify(path) {
            Ok(PathClass::Artifact(ParsedPath {
                coordinates,
                side_file: None,
            })) => coordinates,
            _ => return Ok(None),
        };
        let native = path.to_native(root);
        if !native.is_file() {
            return Ok(None);
        }
        let (size, modified) = modified_at(&native)?;
        Ok(Some(IndexEntry {
            path: path.clone(),
            coordinates,
            size,
            modified,
            source: None,
        }))
    }

    /// Rewrite the index of every group containing a repository.
    fn propagate(&self, storage_id: &str, repository_id: &str) -> Result<()> {
        for group in self
            .config
            .configuration()
            .groups_containing(storage_id, repository_id)
        {
            self.refresh_group(&group)?;
        }
        Ok(())
    }

    /// Rewrite the index of `group` if its member union changed.
    fn refresh_group(&self, group: &RepositoryRef) -> Result<()> {
        let union = self.group_union(group, &mut Vec::new())?;
        let root = self
            .fs
            .repository_root(&group.storage_id, &group.repository_id);
        if RepositoryIndex::load(&root)?.entries == union.entries {
            trace!(group = %group, "group index unchanged");
            return Ok(());
        }
        union.save(&root, self.robustness)?;
        trace!(group = %group, entries = union.len(), "group index updated");
        Ok(())
    }

    /// Union of the member indexes of `group`, computing nested groups from
    /// their own members.
    fn group_union(
        &self,
        group: &RepositoryRef,
        visiting: &mut Vec<RepositoryRef>,
    ) -> Result<RepositoryIndex> {
        let repository = self
            .config
            .repository(&group.storage_id, &group.repository_id)?;
        visiting.push(group.clone());
        let mut members = Vec::new();
        for member in repository.members(&group.storage_id) {
            if visiting.contains(&member) {
                continue;
            }
            let config = self
                .config
                .repository(&member.storage_id, &member.repository_id)?;
            let index = if config.kind == RepositoryType::Group {
                self.group_union(&member, visiting)?
            } else {
                RepositoryIndex::load(
                    &self
                        .fs
                        .repository_root(&member.storage_id, &member.repository_id),
                )?
            };
            members.push((member, index));
        }
        visiting.pop();
        Ok(RepositoryIndex::union(members))
    }

    fn rebuild(
        &self,
        storage_id: &str,
        repository_id: &str,
        base: &NormalizedPath,
        force: bool,
    ) -> Result<IndexRebuildReport> {
        let repository = self.config.repository(storage_id, repository_id)?;
        let root = self.fs.repository_root(storage_id, repository_id);

        if repository.kind == RepositoryType::Group {
            let mut report = IndexRebuildReport::default();
            for member in repository.members(storage_id) {
                report.merge(self.rebuild(&member.storage_id, &member.repository_id, base, force)?);
            }
            let group = RepositoryRef::new(storage_id, repository_id);
            let _documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
            self.refresh_group(&group)?;
            return Ok(report);
        }

        let layout = self.layout_of(repository)?;
        let _documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let mut index = RepositoryIndex::load(&root)?;
        let mut report = IndexRebuildReport::default();

        let mut found = Vec::new();
        for file in fs_io::list_files(&base.to_native(&root))? {
            let relative = NormalizedPath::from_native(&root, &file)?;
            if let Some(entry) = self.entry_for(layout.as_ref(), &root, &relative)? {
                found.push(entry);
            }
        }

        let present: HashSet<NormalizedPath> = found.iter().map(|e| e.path.clone()).collect();
        report.removed = index.prune_under(base, |existing| present.contains(&existing.path));
        let mut changed = report.removed > 0;
        for entry in found {
            let current = !force
                && index
                    .get(&entry.path)
                    .is_some_and(|e| e.size == entry.size && e.modified == entry.modified);
            if current {
                report.unchanged += 1;
                continue;
            }
            changed |= index.upsert(entry);
            report.updated += 1;
        }

        if changed {
            index.save(&root, self.robustness)?;
        }
        self.propagate(storage_id, repository_id)?;
        Ok(report)
    }
}
