//! Trash lifecycle tests

use std::io::Write;

use artifact_fs::{
    ArtifactIo, ArtifactState, ChecksumAlgorithm, DeleteOutcome, Error, FileSystemProvider,
    LocalFileSystem, NormalizedPath, RepositoryPath, TrashManager, WriteOptions,
};
use assert_fs::prelude::*;
use predicates::prelude::*;
use pretty_assertions::assert_eq;

struct Fixture {
    temp: assert_fs::TempDir,
    fs: LocalFileSystem,
    io: ArtifactIo,
    trash: TrashManager,
}

impl Fixture {
    fn new() -> Self {
        let temp = assert_fs::TempDir::new().unwrap();
        let fs = LocalFileSystem::new(temp.path()).unwrap();
        let io = ArtifactIo::default();
        let trash = TrashManager::new(io.clone());
        Self { temp, fs, io, trash }
    }

    fn path(&self, path: &str) -> RepositoryPath {
        self.fs.resolve("storage0", "releases", path).unwrap()
    }

    fn store(&self, path: &str, content: &str) -> RepositoryPath {
        let path = self.path(path);
        let mut writer = self
            .io
            .open_write(&path, WriteOptions::with_algorithms(&[ChecksumAlgorithm::Sha1]))
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
        writer.finish().unwrap();
        path
    }

    fn repo(&self) -> assert_fs::fixture::ChildPath {
        self.temp.child("storages/storage0/releases")
    }
}

#[test]
fn test_content_lives_in_exactly_one_tree() {
    let fx = Fixture::new();
    let path = fx.store("a/b/lib-1.0.jar", "v1");

    fx.trash.delete(&path, false).unwrap();
    fx.repo().child("a/b/lib-1.0.jar").assert(predicate::path::missing());
    fx.repo().child(".trash/a/b/lib-1.0.jar").assert("v1");
    fx.repo()
        .child(".trash/a/b/lib-1.0.jar.sha1")
        .assert(predicate::path::exists());

    fx.trash.undelete(&path).unwrap();
    fx.repo().child("a/b/lib-1.0.jar").assert("v1");
    fx.repo()
        .child(".trash/a/b/lib-1.0.jar")
        .assert(predicate::path::missing());
}

#[test]
fn test_trashing_again_replaces_older_trash_copy() {
    let fx = Fixture::new();
    let path = fx.store("lib.jar", "old");
    fx.trash.delete(&path, false).unwrap();

    fx.store("lib.jar", "new");
    fx.trash.delete(&path, false).unwrap();

    fx.repo().child(".trash/lib.jar").assert("new");
}

#[test]
fn test_forced_delete_of_present_path_also_clears_trash_copy() {
    let fx = Fixture::new();
    let path = fx.store("lib.jar", "old");
    fx.trash.delete(&path, false).unwrap();
    fx.store("lib.jar", "new");

    assert_eq!(fx.trash.delete(&path, true).unwrap(), DeleteOutcome::Purged);
    assert_eq!(fx.trash.state(&path), ArtifactState::Absent);
    assert!(matches!(fx.trash.undelete(&path), Err(Error::TrashState { .. })));
}

#[test]
fn test_directory_delete_moves_whole_subtree() {
    let fx = Fixture::new();
    fx.store("com/acme/lib/1.0/lib-1.0.jar", "a");
    fx.store("com/acme/lib/1.0/lib-1.0.pom", "b");

    let dir = fx.path("com/acme/lib");
    fx.trash.delete(&dir, false).unwrap();
    fx.repo().child("com").assert(predicate::path::missing());
    fx.repo()
        .child(".trash/com/acme/lib/1.0/lib-1.0.pom")
        .assert("b");

    fx.trash.undelete(&dir).unwrap();
    fx.repo().child("com/acme/lib/1.0/lib-1.0.jar").assert("a");
}

#[test]
fn test_restore_all_skips_paths_redeployed_since() {
    let fx = Fixture::new();
    let a = fx.store("a.jar", "a-old");
    let b = fx.store("b.jar", "b-old");
    fx.trash.delete(&a, false).unwrap();
    fx.trash.delete(&b, false).unwrap();
    fx.store("b.jar", "b-new");

    let root = fx.repo().path().to_path_buf();
    let restored = fx
        .trash
        .restore_all(&root, |p| RepositoryPath::new("storage0", "releases", p, &root))
        .unwrap();

    assert_eq!(restored, vec![NormalizedPath::new("a.jar").unwrap()]);
    fx.repo().child("a.jar").assert("a-old");
    fx.repo().child("b.jar").assert("b-new");
    fx.repo().child(".trash").assert(predicate::path::missing());
}

#[test]
fn test_purge_then_undelete_fails() {
    let fx = Fixture::new();
    let path = fx.store("lib.jar", "x");
    fx.trash.delete(&path, false).unwrap();

    let root = fx.repo().path().to_path_buf();
    assert_eq!(fx.trash.purge(&root).unwrap(), 2);
    assert!(matches!(fx.trash.undelete(&path), Err(Error::TrashState { .. })));
}

#[test]
fn test_delete_of_absent_path_is_not_found() {
    let fx = Fixture::new();
    let path = fx.path("missing.jar");
    assert!(fx.trash.delete(&path, false).unwrap_err().is_not_found());
    assert!(fx.trash.delete(&path, true).unwrap_err().is_not_found());
}

#[test]
fn test_directory_delete_merges_into_existing_trash() {
    let fx = Fixture::new();
    let first = fx.store("a/1.0/x.jar", "x");
    fx.store("a/1.0/y.jar", "y");
    fx.trash.delete(&first, false).unwrap();

    let dir = fx.path("a/1.0");
    assert_eq!(fx.trash.delete(&dir, false).unwrap(), DeleteOutcome::Trashed);
    fx.repo().child(".trash/a/1.0/x.jar").assert("x");
    fx.repo().child(".trash/a/1.0/x.jar.sha1").assert(predicate::path::is_file());
    fx.repo().child(".trash/a/1.0/y.jar").assert("y");

    fx.trash.undelete(&first).unwrap();
    fx.repo().child("a/1.0/x.jar").assert("x");
    fx.repo().child(".trash/a/1.0/y.jar").assert("y");
}

#[test]
fn test_directory_delete_replaces_only_colliding_files() {
    let fx = Fixture::new();
    let lib = fx.store("a/1.0/lib.jar", "old");
    fx.trash.delete(&lib, false).unwrap();
    fx.store("a/1.0/lib.jar", "new");
    fx.store("a/1.0/other.jar", "other");

    fx.trash.delete(&fx.path("a"), false).unwrap();
    fx.repo().child(".trash/a/1.0/lib.jar").assert("new");
    fx.repo().child(".trash/a/1.0/other.jar").assert("other");
    fx.repo().child("a").assert(predicate::path::missing());
}

#[test]
fn test_root_delete_is_rejected_before_touching_trash() {
    let fx = Fixture::new();
    let path = fx.store("a/1.0/x.jar", "x");
    fx.store("b.jar", "b");
    fx.trash.delete(&path, false).unwrap();

    let root = fx.path("");
    assert!(matches!(fx.trash.delete(&root, false), Err(Error::InvalidPath { .. })));
    assert!(matches!(fx.trash.delete(&root, true), Err(Error::InvalidPath { .. })));

    fx.repo().child(".trash/a/1.0/x.jar").assert("x");
    fx.repo().child("b.jar").assert("b");
    fx.trash.undelete(&path).unwrap();
    fx.repo().child("a/1.0/x.jar").assert("x");
}

mod backup_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_restore_puts_overwritten_content_back() {
        let fx = Fixture::new();
        let path = fx.store("lib.jar", "old");
        let old_sha1 = std::fs::read_to_string(fx.repo().child("lib.jar.sha1").path()).unwrap();

        let backup = fx.trash.back_up(&path).expect("Should back up live content");
        assert!(backup.had_content());
        fx.store("lib.jar", "new");
        fx.repo().child("lib.jar").assert("new");

        fx.trash.restore_backup(backup).expect("Should restore backup");
        fx.repo().child("lib.jar").assert("old");
        fx.repo().child("lib.jar.sha1").assert(old_sha1.as_str());
        fx.repo().child(".backup").assert(predicate::path::missing());
    }

    #[test]
    fn test_restore_of_absent_path_removes_new_content() {
        let fx = Fixture::new();
        let trashed = fx.store("a/lib.jar", "trashed");
        fx.trash.delete(&trashed, false).unwrap();

        let backup = fx.trash.back_up(&trashed).expect("Should back up absent path");
        assert!(!backup.had_content());
        fx.store("a/lib.jar", "copied");

        fx.trash.restore_backup(backup).expect("Should restore backup");
        fx.repo().child("a").assert(predicate::path::missing());
        // An earlier trash copy is not the backup's to touch
        fx.repo().child(".trash/a/lib.jar").assert("trashed");
    }

    #[test]
    fn test_dropped_backup_keeps_current_state() {
        let fx = Fixture::new();
        let path = fx.store("lib.jar", "old");
        let backup = fx.trash.back_up(&path).unwrap();
        fx.store("lib.jar", "new");
        drop(backup);

        fx.repo().child("lib.jar").assert("new");
        fx.repo().child(".backup").assert(predicate::path::missing());
    }

    #[test]
    fn test_backup_is_invisible_to_listings() {
        let fx = Fixture::new();
        let path = fx.store("lib.jar", "old");
        let _backup = fx.trash.back_up(&path).unwrap();

        let files = artifact_fs::io::list_files(fx.repo().path()).unwrap();
        assert_eq!(files.len(), 2, "{files:?}");
    }
}
