//! Structured artifact identities
//!
//! One variant per layout. Coordinates are plain values: equality is
//! structural over every field, and they never reference storage.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::format::LayoutKind;
use crate::maven::MavenCoordinates;
use crate::nuget::NugetCoordinates;
use crate::pypi::PypiCoordinates;
use crate::raw::RawCoordinates;
use crate::rpm::RpmCoordinates;

/// Named coordinate fields, used for search filters and index documents.
pub type CoordinateFields = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "lowercase")]
pub enum ArtifactCoordinates {
    Maven(MavenCoordinates),
    Nuget(NugetCoordinates),
    Pypi(PypiCoordinates),
    Rpm(RpmCoordinates),
    Raw(RawCoordinates),
}

impl ArtifactCoordinates {
    pub fn layout(&self) -> LayoutKind {
        match self {
            Self::Maven(_) => LayoutKind::Maven,
            Self::Nuget(_) => LayoutKind::Nuget,
            Self::Pypi(_) => LayoutKind::Pypi,
            Self::Rpm(_) => LayoutKind::Rpm,
            Self::Raw(_) => LayoutKind::Raw,
        }
    }

    /// Version string, `None` for raw content.
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Maven(c) => Some(&c.version),
            Self::Nuget(c) => Some(&c.version),
            Self::Pypi(c) => Some(&c.version),
            Self::Rpm(c) => Some(&c.version),
            Self::Raw(_) => None,
        }
    }

    /// Whether this is a pre-release build that snapshot repositories hold.
    ///
    /// Only Maven distinguishes snapshots from releases.
    pub fn is_snapshot(&self) -> bool {
        match self {
            Self::Maven(c) => c.is_snapshot(),
            _ => false,
        }
    }

    pub fn fields(&self) -> CoordinateFields {
        let mut fields = CoordinateFields::new();
        let mut put = |name: &str, value: &str| {
            fields.insert(name.to_string(), value.to_string());
        };
        match self {
            Self::Maven(c) => {
                put("groupId", &c.group_id);
                put("artifactId", &c.artifact_id);
                put("version", &c.version);
                put("baseVersion", &c.base_version());
                if let Some(classifier) = &c.classifier {
                    put("classifier", classifier);
                }
                put("extension", &c.extension);
            }
            Self::Nuget(c) => {
                put("id", &c.id);
                put("version", &c.version);
                put("type", c.kind.extension());
            }
            Self::Pypi(c) => {
                put("name", &c.name);
                put("version", &c.version);
                put("packaging", c.distribution.packaging());
                for (name, value) in c.distribution.tags() {
                    put(name, value);
                }
            }
            Self::Rpm(c) => {
                put("name", &c.name);
                put("version", &c.version);
                put("release", &c.release);
                put("architecture", &c.arch);
            }
            Self::Raw(c) => put("path", &c.path),
        }
        fields
    }
}

impl fmt::Display for ArtifactCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maven(c) => {
                write!(f, "{}:{}:{}", c.group_id, c.artifact_id, c.version)?;
                if let Some(classifier) = &c.classifier {
                    write!(f, ":{}", classifier)?;
                }
                write!(f, "@{}", c.extension)
            }
            Self::Nuget(c) => write!(f, "{} {} ({})", c.id, c.version, c.kind.extension()),
            Self::Pypi(c) => write!(f, "{}=={} ({})", c.name, c.version, c.distribution.packaging()),
            Self::Rpm(c) => write!(f, "{}-{}-{}.{}", c.name, c.version, c.release, c.arch),
            Self::Raw(c) => write!(f, "{}", c.path),
        }
    }
}

impl From<MavenCoordinates> for ArtifactCoordinates {
    fn from(c: MavenCoordinates) -> Self {
        Self::Maven(c)
    }
}

impl From<NugetCoordinates> for ArtifactCoordinates {
    fn from(c: NugetCoordinates) -> Self {
        Self::Nuget(c)
    }
}

impl From<PypiCoordinates> for ArtifactCoordinates {
    fn from(c: PypiCoordinates) -> Self {
        Self::Pypi(c)
    }
}

impl From<RpmCoordinates> for ArtifactCoordinates {
    fn from(c: RpmCoordinates) -> Self {
        Self::Rpm(c)
    }
}

impl From<RawCoordinates> for ArtifactCoordinates {
    fn from(c: RawCoordinates) -> Self {
        Self::Raw(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lib() -> ArtifactCoordinates {
        MavenCoordinates::new("com.acme", "lib", "1.0-20240101.120000-3")
            .with_classifier("sources")
            .into()
    }

    #[test]
    fn test_maven_fields() {
        let fields = lib().fields();
        assert_eq!(fields["groupId"], "com.acme");
        assert_eq!(fields["baseVersion"], "1.0-SNAPSHOT");
        assert_eq!(fields["classifier"], "sources");
        assert_eq!(fields["extension"], "jar");
    }

    #[test]
    fn test_snapshot_detection() {
        assert!(lib().is_snapshot());
        let release: ArtifactCoordinates = MavenCoordinates::new("com.acme", "lib", "1.0").into();
        assert!(!release.is_snapshot());
    }

    #[test]
    fn test_serde_is_tagged_by_layout() {
        let json = serde_json::to_value(lib()).unwrap();
        assert_eq!(json["layout"], "maven");
        let back: ArtifactCoordinates = serde_json::from_value(json).unwrap();
        assert_eq!(back, lib());
    }

    #[test]
    fn test_display() {
        assert_eq!(lib().to_string(), "com.acme:lib:1.0-20240101.120000-3:sources@jar");
    }
}
