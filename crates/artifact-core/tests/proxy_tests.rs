//! Tests for caching proxy repositories

use std::io::Read;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use artifact_core::{
    ArtifactService, CacheState, Error, FAILED_STATE_CAPACITY, RemoteConfig, Repository,
};
use artifact_fs::{ChecksumAlgorithm, Checksums};
use artifact_test_utils::{FakeRemote, RecordingListener, TestStorage};
use pretty_assertions::assert_eq;

const REMOTE: &str = "https://repo.example.org/maven2";
const JAR: &str = "com/acme/lib/1.0/lib-1.0.jar";
const JAR_SHA1: &str = "d55c098ba418fa459ccfc71e586f5a406f4c6b4a";

fn remote_config() -> RemoteConfig {
    RemoteConfig {
        max_connections: 2,
        acquire_timeout_ms: 2_000,
        max_retries: 2,
        initial_backoff_ms: 1,
        max_elapsed_ms: 5_000,
        ..RemoteConfig::new(REMOTE)
    }
}

fn proxy_storage() -> TestStorage {
    TestStorage::new().with_repository(
        "storage0",
        Repository::proxy("central", "maven2", remote_config()),
    )
}

fn url(path: &str) -> String {
    format!("{REMOTE}/{path}")
}

fn service_with(storage: &TestStorage, remote: &Arc<FakeRemote>) -> ArtifactService {
    storage
        .builder()
        .remote_client(remote.clone())
        .build()
        .unwrap()
}

fn read_to_string(service: &ArtifactService, path: &str) -> artifact_core::Result<String> {
    let mut content = String::new();
    service
        .get_input_stream("storage0", "central", path)?
        .read_to_string(&mut content)?;
    Ok(content)
}

#[test]
fn test_miss_fetches_and_caches() {
    let storage = proxy_storage();
    let remote = FakeRemote::new();
    remote.serve(&url(JAR), b"remote-jar");
    let service = service_with(&storage, &remote);

    assert_eq!(
        service.proxy_state("storage0", "central", JAR).unwrap(),
        CacheState::Absent
    );
    assert_eq!(read_to_string(&service, JAR).unwrap(), "remote-jar");
    assert_eq!(read_to_string(&service, JAR).unwrap(), "remote-jar");

    assert_eq!(remote.fetch_count(), 1);
    assert_eq!(
        service.proxy_state("storage0", "central", JAR).unwrap(),
        CacheState::Cached
    );
    assert_eq!(storage.read_file("storage0", "central", &format!("{JAR}.sha1")), JAR_SHA1);
}

#[test]
fn test_concurrent_misses_share_one_fetch() {
    let storage = proxy_storage();
    let remote = FakeRemote::new();
    remote.serve(&url(JAR), b"remote-jar");
    remote.set_delay(Duration::from_millis(200));
    let service = Arc::new(service_with(&storage, &remote));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                read_to_string(&service, JAR).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), "remote-jar");
    }
    assert_eq!(remote.fetch_count(), 1);
}

#[test]
fn test_remote_not_found_caches_nothing() {
    let storage = proxy_storage();
    let remote = FakeRemote::new();
    let service = service_with(&storage, &remote);

    let err = read_to_string(&service, JAR).unwrap_err();
    assert!(err.is_not_found(), "got {err:?}");
    assert!(!err.is_retryable());
    storage.assert_file_not_exists("storage0", "central", JAR);
    assert_eq!(
        service.proxy_state("storage0", "central", JAR).unwrap(),
        CacheState::Failed
    );

    // Failures are not sticky
    remote.serve(&url(JAR), b"remote-jar");
    assert_eq!(read_to_string(&service, JAR).unwrap(), "remote-jar");
    assert_eq!(remote.fetch_count(), 2);
}

#[test]
fn test_fetch_states_stay_bounded() {
    let storage = proxy_storage();
    let remote = FakeRemote::new();
    let service = service_with(&storage, &remote);
    let missing = |i: usize| format!("com/acme/missing/{i}.0/missing-{i}.0.jar");

    for i in 0..FAILED_STATE_CAPACITY + 20 {
        assert!(read_to_string(&service, &missing(i)).unwrap_err().is_not_found());
    }
    assert_eq!(service.context().proxy().tracked_paths(), FAILED_STATE_CAPACITY);
    // The oldest failures are forgotten first
    assert_eq!(
        service.proxy_state("storage0", "central", &missing(0)).unwrap(),
        CacheState::Absent
    );
    assert_eq!(
        service
            .proxy_state("storage0", "central", &missing(FAILED_STATE_CAPACITY + 19))
            .unwrap(),
        CacheState::Failed
    );

    // Successful fetches are tracked by the cached file alone
    remote.serve(&url(JAR), b"remote-jar");
    read_to_string(&service, JAR).unwrap();
    assert_eq!(service.context().proxy().tracked_paths(), FAILED_STATE_CAPACITY);
    assert_eq!(
        service.proxy_state("storage0", "central", JAR).unwrap(),
        CacheState::Cached
    );
}

#[test]
fn test_transient_failures_are_retried() {
    let storage = proxy_storage();
    let remote = FakeRemote::new();
    remote.serve(&url(JAR), b"remote-jar");
    remote.fail_transiently(&url(JAR), 2);
    let service = service_with(&storage, &remote);

    assert_eq!(read_to_string(&service, JAR).unwrap(), "remote-jar");
    assert_eq!(remote.fetch_count(), 3);
}

#[test]
fn test_exhausted_retries_are_distinguishable_from_not_found() {
    let storage = proxy_storage();
    let remote = FakeRemote::new();
    remote.serve(&url(JAR), b"remote-jar");
    remote.fail_transiently(&url(JAR), 10);
    let service = service_with(&storage, &remote);

    let err = read_to_string(&service, JAR).unwrap_err();
    assert!(err.is_retryable(), "got {err:?}");
    assert!(!err.is_not_found());
    assert_eq!(remote.fetch_count(), 3);
    storage.assert_file_not_exists("storage0", "central", JAR);
}

#[test]
fn test_checksum_mismatch_caches_nothing() {
    let storage = proxy_storage();
    let remote = FakeRemote::new();
    let mut declared = Checksums::new();
    declared.insert(ChecksumAlgorithm::Sha1, "0".repeat(40));
    remote.serve_with_checksums(&url(JAR), b"remote-jar", declared);
    let service = service_with(&storage, &remote);

    let err = read_to_string(&service, JAR).unwrap_err();
    assert!(err.is_integrity(), "got {err:?}");
    storage.assert_file_not_exists("storage0", "central", JAR);
    storage.assert_file_not_exists("storage0", "central", &format!("{JAR}.sha1"));
}

#[test]
fn test_invalid_path_never_reaches_remote() {
    let storage = proxy_storage();
    let remote = FakeRemote::new();
    let service = service_with(&storage, &remote);

    let err = read_to_string(&service, "lib.jar").unwrap_err();
    assert!(matches!(err, Error::Layout(_)), "got {err:?}");
    assert_eq!(remote.fetch_count(), 0);
}

#[test]
fn test_client_writes_are_rejected() {
    let storage = proxy_storage();
    let service = service_with(&storage, &FakeRemote::new());

    let err = service
        .store("storage0", "central", JAR, &b"x"[..], Checksums::new())
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation { .. }));
}

#[test]
fn test_delete_invalidates_cached_copy() {
    let storage = proxy_storage();
    let remote = FakeRemote::new();
    remote.serve(&url(JAR), b"remote-jar");
    let listener = RecordingListener::new();
    let service = storage
        .builder()
        .remote_client(remote.clone())
        .listener(listener.clone())
        .build()
        .unwrap();

    read_to_string(&service, JAR).unwrap();
    service.delete("storage0", "central", JAR, true).unwrap();
    assert_eq!(
        service.proxy_state("storage0", "central", JAR).unwrap(),
        CacheState::Absent
    );

    remote.serve(&url(JAR), b"updated-jar");
    assert_eq!(read_to_string(&service, JAR).unwrap(), "updated-jar");
    assert_eq!(remote.fetch_count(), 2);
    assert_eq!(
        listener.names_for(&format!("storage0:central/{JAR}")),
        vec!["stored", "deleted", "stored"]
    );
}

#[test]
fn test_proxy_state_of_hosted_repository_is_unsupported() {
    let storage = TestStorage::new().with_repository("storage0", Repository::hosted("releases", "maven2"));
    let service = storage.service();
    let err = service.proxy_state("storage0", "releases", JAR).unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation { .. }));
}
