use artifact_layout::{
    ArtifactCoordinates, LayoutFormat, MavenCoordinates, MavenLayout, NugetCoordinates,
    NugetLayout, PypiCoordinates, PypiLayout, RpmCoordinates, RpmLayout,
};
use proptest::prelude::*;

fn ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,8}"
}

fn dotted_version() -> impl Strategy<Value = String> {
    prop::collection::vec(0u32..50, 1..4)
        .prop_map(|parts| parts.iter().map(u32::to_string).collect::<Vec<_>>().join("."))
}

fn assert_round_trip(layout: &dyn LayoutFormat, coordinates: ArtifactCoordinates) {
    let path = layout.to_path(&coordinates).unwrap();
    let parsed = layout.parse(&path).unwrap();
    assert_eq!(parsed.coordinates, coordinates, "path {}", path);
    assert_eq!(layout.to_path(&parsed.coordinates).unwrap(), path);
}

proptest! {
    #[test]
    fn maven_coordinates_round_trip(
        group in prop::collection::vec(ident(), 1..4),
        artifact in ident(),
        version in dotted_version(),
        snapshot in prop::option::of((1u32..500, 1u32..29)),
        classifier in prop::option::of(ident()),
        extension in prop::sample::select(vec!["jar", "pom", "war", "tar.gz"]),
    ) {
        let version = match snapshot {
            Some((build, day)) => format!("{}-202401{:02}.120000-{}", version, day, build),
            None => version,
        };
        let mut coordinates = MavenCoordinates::new(group.join("."), artifact, version)
            .with_extension(extension);
        coordinates.classifier = classifier;
        assert_round_trip(&MavenLayout, ArtifactCoordinates::Maven(coordinates));
    }

    #[test]
    fn nuget_coordinates_round_trip(
        id in "[A-Z][a-z]{1,6}(\\.[A-Z][a-z]{1,6}){0,2}",
        version in dotted_version(),
        nuspec in any::<bool>(),
    ) {
        let mut coordinates = NugetCoordinates::new(id, version);
        if nuspec {
            coordinates = coordinates.nuspec();
        }
        assert_round_trip(&NugetLayout, ArtifactCoordinates::Nuget(coordinates));
    }

    #[test]
    fn pypi_coordinates_round_trip(
        name in "[a-z][a-z0-9_]{0,8}",
        version in dotted_version(),
        wheel in any::<bool>(),
    ) {
        let coordinates = if wheel {
            PypiCoordinates::wheel(name, version, "py3", "none", "any")
        } else {
            PypiCoordinates::sdist(name, version)
        };
        assert_round_trip(&PypiLayout, ArtifactCoordinates::Pypi(coordinates));
    }

    #[test]
    fn rpm_coordinates_round_trip(
        name in "[a-z][a-z0-9]{0,5}(-[a-z0-9]{1,4}){0,2}",
        version in dotted_version(),
        release in "[0-9]{1,2}(\\.el[0-9])?",
        arch in prop::sample::select(vec!["x86_64", "noarch", "src", "aarch64"]),
        directory in prop::option::of(ident()),
    ) {
        let mut coordinates = RpmCoordinates::new(name, version, release, arch);
        coordinates.directory = directory;
        assert_round_trip(&RpmLayout, ArtifactCoordinates::Rpm(coordinates));
    }
}
