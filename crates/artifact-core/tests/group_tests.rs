//! Tests for group repositories

use std::io::Read;

use artifact_core::{
    ArtifactService, Error, RemoteConfig, Repository, RepositoryStatus, SearchRequest,
};
use artifact_fs::Checksums;
use artifact_test_utils::{FakeRemote, TestStorage};
use pretty_assertions::assert_eq;

const JAR: &str = "com/acme/lib/1.0/lib-1.0.jar";

fn group_storage() -> TestStorage {
    TestStorage::new()
        .with_repository("storage0", Repository::hosted("a", "maven2"))
        .with_repository("storage0", Repository::hosted("b", "maven2"))
        .with_repository("storage0", Repository::group("public", "maven2", ["a", "b"]))
}

fn read(service: &ArtifactService, repository: &str, path: &str) -> artifact_core::Result<String> {
    let mut content = String::new();
    service
        .get_input_stream("storage0", repository, path)?
        .read_to_string(&mut content)?;
    Ok(content)
}

fn store(service: &ArtifactService, repository: &str, path: &str, content: &str) {
    service
        .store("storage0", repository, path, content.as_bytes(), Checksums::new())
        .unwrap();
}

mod read_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_first_member_wins() {
        let storage = group_storage();
        let service = storage.service();
        store(&service, "a", JAR, "from-a");
        store(&service, "b", JAR, "from-b");

        assert_eq!(read(&service, "public", JAR).unwrap(), "from-a");
    }

    #[test]
    fn test_falls_through_to_later_members() {
        let storage = group_storage();
        let service = storage.service();
        store(&service, "b", JAR, "from-b");

        assert_eq!(read(&service, "public", JAR).unwrap(), "from-b");
        assert!(service.contains("storage0", "public", JAR).unwrap());
    }

    #[test]
    fn test_missing_everywhere_is_not_found() {
        let storage = group_storage();
        let service = storage.service();
        let err = read(&service, "public", JAR).unwrap_err();
        assert!(err.is_not_found());
        assert!(!service.contains("storage0", "public", JAR).unwrap());
    }

    #[test]
    fn test_out_of_service_members_are_skipped() {
        let mut storage = group_storage();
        storage.repository_mut("storage0", "a").status = RepositoryStatus::OutOfService;
        let service = storage.service();
        store(&service, "b", JAR, "from-b");
        storage.write_file("storage0", "a", JAR, b"from-a");

        assert_eq!(read(&service, "public", JAR).unwrap(), "from-b");
    }

    #[test]
    fn test_nested_groups_resolve_recursively() {
        let storage = group_storage()
            .with_repository("storage0", Repository::hosted("c", "maven2"))
            .with_repository("storage0", Repository::group("all", "maven2", ["c", "public"]));
        let service = storage.service();
        store(&service, "b", JAR, "from-b");

        assert_eq!(read(&service, "all", JAR).unwrap(), "from-b");
    }

    #[test]
    fn test_member_failure_surfaces_when_nothing_found() {
        let remote = RemoteConfig {
            max_retries: 0,
            initial_backoff_ms: 1,
            ..RemoteConfig::new("https://repo.example.org/maven2")
        };
        let storage = TestStorage::new()
            .with_repository("storage0", Repository::hosted("a", "maven2"))
            .with_repository("storage0", Repository::proxy("central", "maven2", remote))
            .with_repository("storage0", Repository::group("public", "maven2", ["a", "central"]));
        let fake = FakeRemote::new();
        fake.fail_transiently(&format!("https://repo.example.org/maven2/{JAR}"), 5);
        let service = storage
            .builder()
            .remote_client(fake.clone())
            .build()
            .unwrap();

        let err = read(&service, "public", JAR).unwrap_err();
        assert!(err.is_retryable(), "got {err:?}");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_proxy_member_is_fetched_through_group() {
        let storage = TestStorage::new()
            .with_repository("storage0", Repository::hosted("a", "maven2"))
            .with_repository(
                "storage0",
                Repository::proxy("central", "maven2", RemoteConfig::new("https://repo.example.org/maven2")),
            )
            .with_repository("storage0", Repository::group("public", "maven2", ["a", "central"]));
        let fake = FakeRemote::new();
        fake.serve(&format!("https://repo.example.org/maven2/{JAR}"), b"remote-jar");
        let service = storage
            .builder()
            .remote_client(fake.clone())
            .build()
            .unwrap();

        assert_eq!(read(&service, "public", JAR).unwrap(), "remote-jar");
        storage.assert_file_exists("storage0", "central", JAR);
    }
}

mod write_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_writes_go_to_first_hosted_member() {
        let storage = group_storage();
        let service = storage.service();
        store(&service, "public", JAR, "deployed");

        storage.assert_file_exists("storage0", "a", JAR);
        storage.assert_file_not_exists("storage0", "b", JAR);
        storage.assert_file_not_exists("storage0", "public", JAR);
    }

    #[test]
    fn test_writes_go_to_deploy_target() {
        let storage = TestStorage::new()
            .with_repository("storage0", Repository::hosted("a", "maven2"))
            .with_repository("storage0", Repository::hosted("b", "maven2"))
            .with_repository(
                "storage0",
                Repository::group("public", "maven2", ["a", "b"]).with_deploy_target("b"),
            );
        let service = storage.service();
        store(&service, "public", JAR, "deployed");

        storage.assert_file_exists("storage0", "b", JAR);
        storage.assert_file_not_exists("storage0", "a", JAR);
    }

    #[test]
    fn test_group_without_hosted_member_rejects_writes() {
        let storage = TestStorage::new()
            .with_repository(
                "storage0",
                Repository::proxy("central", "maven2", RemoteConfig::new("https://repo.example.org/maven2")),
            )
            .with_repository("storage0", Repository::group("public", "maven2", ["central"]));
        let service = storage.service();
        let err = service
            .store("storage0", "public", JAR, &b"x"[..], Checksums::new())
            .unwrap_err();
        assert!(matches!(err, Error::NoDeployTarget { .. }), "got {err:?}");
    }

    #[test]
    fn test_group_delete_is_unsupported() {
        let storage = group_storage();
        let service = storage.service();
        store(&service, "a", JAR, "from-a");
        let err = service.delete("storage0", "public", JAR, false).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
        assert!(service.contains("storage0", "a", JAR).unwrap());
    }
}

#[test]
fn test_search_deduplicates_by_path() {
    let storage = group_storage();
    let service = storage.service();
    store(&service, "a", JAR, "from-a");
    store(&service, "b", JAR, "from-b");
    store(&service, "b", "com/acme/other/1.0/other-1.0.jar", "other");

    let results = service
        .search(&SearchRequest::new("storage0").in_repository("public"))
        .unwrap();
    let found: Vec<(String, &str)> = results
        .iter()
        .map(|r| (r.repository.to_string(), r.path.as_str()))
        .collect();
    assert_eq!(
        found,
        vec![
            ("storage0:a".to_string(), JAR),
            ("storage0:b".to_string(), "com/acme/other/1.0/other-1.0.jar"),
        ]
    );
}
