//! End-to-end scenarios across storages, layouts and repository types
//!
//! Each test loads its configuration from disk, builds a service and drives
//! it only through the public operation surface.

use std::io::Read;
use std::time::Duration;

use artifact_core::{
    ArtifactLocation, ArtifactService, CacheState, ConfigStore, Configuration, RemoteConfig,
    Repository, RepositoryIndex, RepositoryPolicy, RepositoryRef, SearchRequest, Storage,
    TrashScope,
};
use artifact_fs::{ChecksumAlgorithm, Checksums, DeleteOutcome};
use artifact_test_utils::{FakeRemote, RecordingListener};
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::*;
use pretty_assertions::assert_eq;

const REMOTE: &str = "https://repo.example.org/maven2";
const JAR: &str = "com/acme/lib/1.0/lib-1.0.jar";
const POM: &str = "com/acme/lib/1.0/lib-1.0.pom";
const CACHED: &str = "org/example/util/2.1/util-2.1.jar";

/// Write the configuration for `temp` to a TOML file and load it back.
fn load_configuration(temp: &TempDir) -> Configuration {
    let mut config = Configuration::new(temp.path().join("base"))
        .with_storage(
            Storage::new("storage0")
                .with_repository(
                    Repository::hosted("releases", "maven2").with_policy(RepositoryPolicy::Release),
                )
                .with_repository(
                    Repository::hosted("snapshots", "maven2").with_policy(RepositoryPolicy::Snapshot),
                )
                .with_repository(Repository::proxy(
                    "central",
                    "maven2",
                    RemoteConfig {
                        initial_backoff_ms: 1,
                        ..RemoteConfig::new(REMOTE)
                    },
                ))
                .with_repository(
                    Repository::group("public", "maven2", ["releases", "snapshots", "central"])
                        .with_deploy_target("snapshots"),
                ),
        )
        .with_storage(
            Storage::new("storage1")
                .with_repository(Repository::hosted("nuget", "nuget"))
                .with_repository(Repository::hosted("pypi", "pypi"))
                .with_repository(Repository::hosted("files", "raw")),
        );
    config.io.fsync = false;

    let store = ConfigStore::new(temp.path().join("artifacts.toml")).expect("Should detect format");
    store.save(&config).expect("Should save configuration");
    store.load().expect("Should load configuration")
}

fn read(service: &ArtifactService, storage: &str, repository: &str, path: &str) -> String {
    let mut content = String::new();
    service
        .get_input_stream(storage, repository, path)
        .expect("Should open artifact")
        .read_to_string(&mut content)
        .expect("Should read artifact");
    content
}

fn store(service: &ArtifactService, storage: &str, repository: &str, path: &str, content: &str) {
    service
        .store(storage, repository, path, content.as_bytes(), Checksums::new())
        .expect("Should store artifact");
}

#[test]
fn test_maven_release_lifecycle() {
    let temp = TempDir::new().expect("Should create temp dir");
    let listener = RecordingListener::new();
    let service = ArtifactService::builder(load_configuration(&temp))
        .listener(listener.clone())
        .build()
        .expect("Should build service");

    store(&service, "storage0", "releases", JAR, "jar-content");
    store(&service, "storage0", "releases", POM, "<project/>");
    assert_eq!(listener.count("stored"), 2);

    let releases = temp.child("base/storages/storage0/releases");
    releases
        .child(format!("{JAR}.sha1"))
        .assert("b52cbd1cdc6153cd97bf10a944505f1072e0ceec");
    releases
        .child(format!("{JAR}.md5"))
        .assert("4e47b8caf44da9499c6ac5a6b0f39641");

    let report = service
        .rebuild_metadata("storage0", "releases", "com/acme/lib")
        .expect("Should rebuild metadata");
    assert!(
        report
            .written
            .iter()
            .any(|p| p.as_str() == "com/acme/lib/maven-metadata.xml")
    );
    releases
        .child("com/acme/lib/maven-metadata.xml")
        .assert(predicate::str::contains("<release>1.0</release>"));

    // The group reads through to the hosted member
    assert_eq!(read(&service, "storage0", "public", JAR), "jar-content");

    // Snapshots are refused by the release repository
    let err = service
        .store(
            "storage0",
            "releases",
            "com/acme/lib/2.0-SNAPSHOT/lib-2.0-SNAPSHOT.jar",
            &b"snapshot"[..],
            Checksums::new(),
        )
        .unwrap_err();
    assert!(matches!(err, artifact_core::Error::PolicyViolation { .. }), "got {err:?}");

    // Soft delete, restore from the trash, delete again and purge
    let outcome = service
        .delete("storage0", "releases", JAR, false)
        .expect("Should delete artifact");
    assert_eq!(outcome, DeleteOutcome::Trashed);
    releases.child(format!(".trash/{JAR}")).assert(predicate::path::is_file());
    assert!(!service.contains("storage0", "releases", JAR).expect("Should check"));

    let scope = TrashScope::Repository(RepositoryRef::new("storage0", "releases"));
    let restored = service.undelete_trash(&scope).expect("Should restore trash");
    assert_eq!(restored.len(), 1);
    assert_eq!(read(&service, "storage0", "releases", JAR), "jar-content");

    service
        .delete("storage0", "releases", JAR, false)
        .expect("Should delete artifact");
    assert!(service.delete_trash(&TrashScope::All).expect("Should purge trash") >= 1);
    releases.child(".trash").assert(predicate::path::missing());
    assert_eq!(
        listener.names_for(&format!("storage0:releases/{JAR}")),
        vec!["stored", "deleted", "undeleted", "deleted"]
    );
}

#[test]
fn test_group_deploys_and_proxies() {
    let temp = TempDir::new().expect("Should create temp dir");
    let remote = FakeRemote::new();
    remote.serve(&format!("{REMOTE}/{CACHED}"), b"cached-util");
    let service = ArtifactService::builder(load_configuration(&temp))
        .remote_client(remote.clone())
        .build()
        .expect("Should build service");

    // Deploys through the group land in its deploy target
    let snapshot = "com/acme/lib/2.0-SNAPSHOT/lib-2.0-SNAPSHOT.jar";
    store(&service, "storage0", "public", snapshot, "snapshot");
    assert!(service.contains("storage0", "snapshots", snapshot).expect("Should check"));
    assert!(!service.contains("storage0", "releases", snapshot).expect("Should check"));

    // Misses fall through to the proxy and are cached once
    assert_eq!(read(&service, "storage0", "public", CACHED), "cached-util");
    assert_eq!(read(&service, "storage0", "public", CACHED), "cached-util");
    assert_eq!(remote.fetch_count(), 1);
    assert_eq!(
        service
            .proxy_state("storage0", "central", CACHED)
            .expect("Should report state"),
        CacheState::Cached
    );

    // Promote the cached copy into the release repository
    let copied = service
        .copy(
            &ArtifactLocation::new("storage0", "central", CACHED),
            &ArtifactLocation::new("storage0", "releases", CACHED),
        )
        .expect("Should copy artifact");
    assert_eq!(copied.len(), 1);
    assert_eq!(read(&service, "storage0", "releases", CACHED), "cached-util");
    assert_eq!(remote.fetch_count(), 1);

    let found = service
        .search(&SearchRequest::new("storage0").with_filter("artifactId", "util"))
        .expect("Should search");
    let repositories: Vec<String> = found.iter().map(|r| r.repository.repository_id.clone()).collect();
    assert_eq!(repositories, vec!["releases", "central"]);
}

#[test]
fn test_layouts_side_by_side() {
    let temp = TempDir::new().expect("Should create temp dir");
    let service = ArtifactService::builder(load_configuration(&temp))
        .build()
        .expect("Should build service");

    store(&service, "storage1", "nuget", "Foo/1.0.0/Foo.1.0.0.nupkg", "nupkg");
    store(&service, "storage1", "pypi", "requests/2.31.0/requests-2.31.0.tar.gz", "sdist");
    store(&service, "storage1", "files", "deep/nested/file.bin", "raw");

    let storage1 = temp.child("base/storages/storage1");
    storage1
        .child("nuget/Foo/1.0.0/Foo.1.0.0.nupkg.sha512")
        .assert(predicate::str::is_match("^[A-Za-z0-9+/]{86}==$").expect("Should compile regex"));
    storage1
        .child("pypi/requests/2.31.0/requests-2.31.0.tar.gz.sha256")
        .assert(predicate::str::is_match("^[0-9a-f]{64}$").expect("Should compile regex"));
    storage1
        .child("files/deep/nested/file.bin.sha1")
        .assert(predicate::path::is_file());

    let report = service
        .rebuild_metadata("storage1", "nuget", "")
        .expect("Should rebuild metadata");
    assert_eq!(report.written.len(), 1);
    let index: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(storage1.child("nuget/Foo/index.json").path())
            .expect("Should read package index"),
    )
    .expect("Should parse package index");
    assert_eq!(index["versions"], serde_json::json!(["1.0.0"]));

    // Paths must match the layout's grammar
    let err = service
        .store(
            "storage1",
            "pypi",
            "requests/2.31.0/other-1.0.tar.gz",
            &b"x"[..],
            Checksums::new(),
        )
        .unwrap_err();
    assert!(matches!(err, artifact_core::Error::Layout(_)), "got {err:?}");

    let found = service
        .search(&SearchRequest::new("storage1"))
        .expect("Should search");
    let paths: Vec<&str> = found.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "Foo/1.0.0/Foo.1.0.0.nupkg",
            "requests/2.31.0/requests-2.31.0.tar.gz",
            "deep/nested/file.bin"
        ]
    );
}

#[test]
fn test_declared_checksums_are_verified() {
    let temp = TempDir::new().expect("Should create temp dir");
    let service = ArtifactService::builder(load_configuration(&temp))
        .build()
        .expect("Should build service");

    let mut declared = Checksums::new();
    declared.insert(ChecksumAlgorithm::Sha1, "0".repeat(40));
    let err = service
        .store("storage0", "releases", JAR, &b"jar-content"[..], declared)
        .unwrap_err();
    assert!(err.is_integrity(), "got {err:?}");
    assert!(!service.contains("storage0", "releases", JAR).expect("Should check"));
}

#[test]
fn test_index_follows_changes_into_groups() {
    let temp = TempDir::new().expect("Should create temp dir");
    let config = load_configuration(&temp);
    let base = config.base_dir.clone();
    let service = ArtifactService::builder(config)
        .build()
        .expect("Should build service");

    store(&service, "storage0", "releases", JAR, "jar-content");
    store(&service, "storage0", "snapshots", "com/acme/lib/2.0-SNAPSHOT/lib-2.0-SNAPSHOT.jar", "s");
    assert!(service.index().wait_idle(Duration::from_secs(10)));

    let public = RepositoryIndex::load(&base.join("storages/storage0/public"))
        .expect("Should load group index");
    let sources: Vec<&str> = public
        .entries
        .iter()
        .filter_map(|e| e.source.as_deref())
        .collect();
    assert_eq!(sources, vec!["storage0:releases", "storage0:snapshots"]);
}
