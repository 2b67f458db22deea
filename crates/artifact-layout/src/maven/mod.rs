//! Maven 2 repository layout
//!
//! `groupId(/->.)/artifactId/version/artifactId-version[-classifier].extension`.
//! Timestamped snapshots live under their `-SNAPSHOT` base version directory.

mod metadata;
pub mod version;

use std::path::Path;

use artifact_fs::{ChecksumAlgorithm, NormalizedPath, RobustnessConfig};
use serde::{Deserialize, Serialize};

use crate::coordinates::ArtifactCoordinates;
use crate::format::{LayoutFormat, LayoutKind, MetadataReport, require_segment};
use crate::{Error, Result};

pub use metadata::METADATA_FILE;

/// Maven artifact identity. `version` is the file version, which for
/// timestamped snapshots differs from the directory (base) version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MavenCoordinates {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
    pub extension: String,
}

impl MavenCoordinates {
    /// A classifier-less `jar`.
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            classifier: None,
            extension: "jar".to_string(),
        }
    }

    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Name of the version directory.
    pub fn base_version(&self) -> String {
        version::base_version(&self.version)
    }

    pub fn is_snapshot(&self) -> bool {
        version::is_snapshot_version(&self.version)
    }

    /// `groupId/artifactId` directory.
    pub fn artifact_dir(&self) -> String {
        format!("{}/{}", self.group_id.replace('.', "/"), self.artifact_id)
    }

    fn file_name(&self) -> String {
        match &self.classifier {
            Some(classifier) => format!(
                "{}-{}-{}.{}",
                self.artifact_id, self.version, classifier, self.extension
            ),
            None => format!("{}-{}.{}", self.artifact_id, self.version, self.extension),
        }
    }

    fn validate(&self) -> Result<()> {
        for segment in self.group_id.split('.') {
            require_segment(LayoutKind::Maven, "groupId", segment)?;
        }
        require_segment(LayoutKind::Maven, "artifactId", &self.artifact_id)?;
        require_segment(LayoutKind::Maven, "version", &self.version)?;
        require_segment(LayoutKind::Maven, "extension", &self.extension)?;
        if let Some(classifier) = &self.classifier {
            require_segment(LayoutKind::Maven, "classifier", classifier)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MavenLayout;

const DIGESTS: &[ChecksumAlgorithm] = &[ChecksumAlgorithm::Md5, ChecksumAlgorithm::Sha1];

impl MavenLayout {
    fn error(path: &NormalizedPath, reason: impl Into<String>) -> Error {
        Error::parse(LayoutKind::Maven, path.as_str(), reason)
    }

    /// Split `rest` (file name after `artifactId-`) into version and the
    /// remaining `[-classifier].extension`.
    fn split_version<'a>(
        path: &NormalizedPath,
        dir_version: &str,
        rest: &'a str,
    ) -> Result<(String, &'a str)> {
        if let Some(remainder) = rest.strip_prefix(dir_version) {
            if remainder.starts_with('.') || remainder.starts_with('-') {
                return Ok((dir_version.to_string(), remainder));
            }
        }

        let base = dir_version
            .strip_suffix(version::SNAPSHOT_SUFFIX)
            .ok_or_else(|| {
                Self::error(
                    path,
                    format!("file name does not carry version '{}'", dir_version),
                )
            })?;
        let timestamped = rest
            .strip_prefix(base)
            .and_then(|r| r.strip_prefix('-'))
            .ok_or_else(|| Self::error(path, "file name does not carry the snapshot base version"))?;

        // 20240101.120000-3
        let stamp_len = "yyyyMMdd.HHmmss".len();
        let (stamp, after) = (timestamped.get(..stamp_len), timestamped.get(stamp_len..));
        let (Some(stamp), Some(after)) = (stamp, after) else {
            return Err(Self::error(path, "truncated snapshot timestamp"));
        };
        let after = after
            .strip_prefix('-')
            .ok_or_else(|| Self::error(path, "missing snapshot build number"))?;
        let digits = after.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(Self::error(path, "missing snapshot build number"));
        }
        let version = format!("{}-{}-{}", base, stamp, &after[..digits]);
        if !version::TIMESTAMPED_VERSION.is_match(&version) {
            return Err(Self::error(path, "malformed snapshot timestamp"));
        }
        Ok((version, &after[digits..]))
    }
}

impl LayoutFormat for MavenLayout {
    fn kind(&self) -> LayoutKind {
        LayoutKind::Maven
    }

    fn parse_artifact(&self, path: &NormalizedPath) -> Result<ArtifactCoordinates> {
        let segments: Vec<&str> = path.segments().collect();
        if segments.len() < 4 {
            return Err(Self::error(
                path,
                "expected groupId/artifactId/version/file",
            ));
        }
        let n = segments.len();
        let file_name = segments[n - 1];
        let dir_version = segments[n - 2];
        let artifact_id = segments[n - 3];
        let group_id = segments[..n - 3].join(".");

        let rest = file_name
            .strip_prefix(artifact_id)
            .and_then(|r| r.strip_prefix('-'))
            .ok_or_else(|| {
                Self::error(path, format!("file name must start with '{}-'", artifact_id))
            })?;

        let (version, remainder) = Self::split_version(path, dir_version, rest)?;
        if version::base_version(&version) != dir_version {
            return Err(Self::error(
                path,
                format!("version '{}' does not belong in directory '{}'", version, dir_version),
            ));
        }

        let (classifier, extension) = if let Some(extension) = remainder.strip_prefix('.') {
            (None, extension)
        } else if let Some(classified) = remainder.strip_prefix('-') {
            let (classifier, extension) = classified
                .split_once('.')
                .ok_or_else(|| Self::error(path, "missing extension"))?;
            (Some(classifier.to_string()), extension)
        } else {
            return Err(Self::error(path, "missing extension"));
        };
        if extension.is_empty() || classifier.as_deref() == Some("") {
            return Err(Self::error(path, "empty classifier or extension"));
        }

        Ok(ArtifactCoordinates::Maven(MavenCoordinates {
            group_id,
            artifact_id: artifact_id.to_string(),
            version,
            classifier,
            extension: extension.to_string(),
        }))
    }

    fn to_path(&self, coordinates: &ArtifactCoordinates) -> Result<NormalizedPath> {
        let ArtifactCoordinates::Maven(c) = coordinates else {
            return Err(self.mismatch(coordinates));
        };
        c.validate()?;
        Ok(NormalizedPath::new(format!(
            "{}/{}/{}",
            c.artifact_dir(),
            c.base_version(),
            c.file_name()
        ))?)
    }

    fn digest_algorithms(&self) -> &'static [ChecksumAlgorithm] {
        DIGESTS
    }

    fn is_metadata(&self, primary: &NormalizedPath) -> bool {
        primary
            .file_name()
            .is_some_and(|name| name == METADATA_FILE || name.starts_with("maven-metadata-"))
    }

    fn metadata_base(&self, coordinates: &ArtifactCoordinates) -> Option<NormalizedPath> {
        match coordinates {
            ArtifactCoordinates::Maven(c) => NormalizedPath::new(c.artifact_dir()).ok(),
            _ => None,
        }
    }

    fn rebuild_metadata(
        &self,
        repository_root: &Path,
        base: &NormalizedPath,
        config: RobustnessConfig,
    ) -> Result<MetadataReport> {
        metadata::rebuild(self, repository_root, base, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(path: &str) -> Result<ArtifactCoordinates> {
        MavenLayout.parse_artifact(&NormalizedPath::new(path).unwrap())
    }

    #[test]
    fn test_parse_release_with_classifier() {
        let coordinates = parse("com/acme/lib/1.0/lib-1.0-sources.jar").unwrap();
        assert_eq!(
            coordinates,
            ArtifactCoordinates::Maven(
                MavenCoordinates::new("com.acme", "lib", "1.0").with_classifier("sources")
            )
        );
    }

    #[test]
    fn test_parse_timestamped_snapshot() {
        let coordinates = parse("com/acme/lib/1.0-SNAPSHOT/lib-1.0-20240101.120000-3.pom").unwrap();
        assert_eq!(
            coordinates,
            ArtifactCoordinates::Maven(
                MavenCoordinates::new("com.acme", "lib", "1.0-20240101.120000-3")
                    .with_extension("pom")
            )
        );
    }

    #[test]
    fn test_multi_dot_extension() {
        let coordinates = parse("org/x/dist/2.0/dist-2.0-bin.tar.gz").unwrap();
        let ArtifactCoordinates::Maven(c) = coordinates else {
            panic!("expected maven coordinates");
        };
        assert_eq!(c.classifier.as_deref(), Some("bin"));
        assert_eq!(c.extension, "tar.gz");
    }

    #[test]
    fn test_rejects_mismatched_version_directory() {
        assert!(parse("com/acme/lib/1.0/lib-2.0.jar").is_err());
        assert!(parse("com/acme/lib/1.0-SNAPSHOT/lib-1.1-20240101.120000-3.jar").is_err());
        assert!(parse("com/acme/lib/1.0/other-1.0.jar").is_err());
        assert!(parse("lib/1.0/lib-1.0.jar").is_err());
    }

    #[test]
    fn test_metadata_is_not_an_artifact() {
        let path = NormalizedPath::new("com/acme/lib/maven-metadata.xml.sha1").unwrap();
        assert!(MavenLayout.parse(&path).is_err());
        assert!(matches!(
            MavenLayout.classify(&path).unwrap(),
            crate::format::PathClass::Metadata {
                side_file: Some(ChecksumAlgorithm::Sha1)
            }
        ));
    }
}
