use artifact_fs::{ChecksumAlgorithm, Error, NormalizedPath, validate_path_identifier};
use proptest::prelude::*;
use rstest::rstest;

#[rstest]
#[case("a/b/c.jar", "a/b/c.jar")]
#[case("/a/b", "a/b")]
#[case("a//b/./c", "a/b/c")]
#[case("a\\b\\c", "a/b/c")]
#[case("", "")]
#[case("./", "")]
fn test_normalization(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(NormalizedPath::new(input).unwrap().as_str(), expected);
}

#[rstest]
#[case("../etc/passwd")]
#[case("a/../../b")]
#[case("a/.trash/b")]
#[case(".index/index.json")]
#[case("a/.lib.jar.tmp")]
#[case("a/b\u{0}c")]
fn test_rejected_paths(#[case] input: &str) {
    assert!(matches!(
        NormalizedPath::new(input),
        Err(Error::InvalidPath { .. })
    ));
}

#[rstest]
#[case("storage0", true)]
#[case("maven-releases_1.x", true)]
#[case("", false)]
#[case(".hidden", false)]
#[case("a/b", false)]
#[case("spaces here", false)]
fn test_identifier_validation(#[case] value: &str, #[case] valid: bool) {
    assert_eq!(validate_path_identifier(value).is_ok(), valid);
}

#[test]
fn test_side_file_path() {
    let path = NormalizedPath::new("a/lib.jar").unwrap();
    assert_eq!(
        path.side_file(ChecksumAlgorithm::Sha256).unwrap().as_str(),
        "a/lib.jar.sha256"
    );
    assert!(NormalizedPath::root().side_file(ChecksumAlgorithm::Md5).is_err());
}

proptest! {
    #[test]
    fn test_normalized_paths_never_escape(s in "\\PC*") {
        if let Ok(path) = NormalizedPath::new(&s) {
            prop_assert!(!path.as_str().contains('\\'));
            prop_assert!(!path.as_str().contains("//"));
            prop_assert!(!path.as_str().starts_with('/'));
            prop_assert!(path.segments().all(|seg| seg != ".." && !seg.starts_with('.')));
        }
    }

    #[test]
    fn test_normalization_is_idempotent(s in "[a-z0-9./\\\\]{0,40}") {
        if let Ok(path) = NormalizedPath::new(&s) {
            let again = NormalizedPath::new(path.as_str()).unwrap();
            prop_assert_eq!(path, again);
        }
    }

    #[test]
    fn test_native_round_trip(segments in proptest::collection::vec("[a-z0-9][a-z0-9_.-]{0,10}", 1..6)) {
        let root = std::path::Path::new("/srv/storage");
        let path = NormalizedPath::new(segments.join("/")).unwrap();
        let native = path.to_native(root);
        prop_assert_eq!(NormalizedPath::from_native(root, &native).unwrap(), path);
    }
}
