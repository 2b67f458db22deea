//! The contract every layout implements
//!
//! A layout is a pure codec between coordinates and repository-relative
//! paths, plus an optional aggregate-metadata generator. Parsing never
//! touches storage.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use artifact_fs::{ChecksumAlgorithm, NormalizedPath, RobustnessConfig, SideFileEncodings};
use serde::{Deserialize, Serialize};

use crate::coordinates::ArtifactCoordinates;
use crate::{Error, Result};

/// Identity of a layout implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    Maven,
    Nuget,
    Pypi,
    Rpm,
    Raw,
}

impl LayoutKind {
    pub const ALL: [LayoutKind; 5] = [
        Self::Maven,
        Self::Nuget,
        Self::Pypi,
        Self::Rpm,
        Self::Raw,
    ];

    /// Canonical alias.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Maven => "maven",
            Self::Nuget => "nuget",
            Self::Pypi => "pypi",
            Self::Rpm => "rpm",
            Self::Raw => "raw",
        }
    }

    /// Every alias accepted for this layout, lowercase.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Maven => &["maven", "maven2", "maven 2"],
            Self::Nuget => &["nuget"],
            Self::Pypi => &["pypi"],
            Self::Rpm => &["rpm"],
            Self::Raw => &["raw"],
        }
    }
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LayoutKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let alias = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.aliases().contains(&alias.as_str()))
            .ok_or_else(|| Error::UnsupportedLayout {
                alias: s.to_string(),
            })
    }
}

/// Coordinates of a path, plus the algorithm if the path is a side file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedPath {
    pub coordinates: ArtifactCoordinates,
    pub side_file: Option<ChecksumAlgorithm>,
}

impl ParsedPath {
    pub fn is_side_file(&self) -> bool {
        self.side_file.is_some()
    }
}

/// What a repository-relative path denotes for a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathClass {
    /// An artifact or one of its side files
    Artifact(ParsedPath),
    /// Layout-generated aggregate metadata or one of its side files
    Metadata {
        side_file: Option<ChecksumAlgorithm>,
    },
}

/// Files touched by a metadata rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataReport {
    pub written: Vec<NormalizedPath>,
    pub removed: Vec<NormalizedPath>,
}

impl MetadataReport {
    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.removed.is_empty()
    }

    pub fn merge(&mut self, other: MetadataReport) {
        self.written.extend(other.written);
        self.removed.extend(other.removed);
    }
}

/// Codec and metadata generator for one packaging ecosystem.
pub trait LayoutFormat: Send + Sync + fmt::Debug {
    fn kind(&self) -> LayoutKind;

    /// Parse a primary artifact path (never a side file or metadata).
    fn parse_artifact(&self, path: &NormalizedPath) -> Result<ArtifactCoordinates>;

    /// Canonical path of `coordinates`.
    fn to_path(&self, coordinates: &ArtifactCoordinates) -> Result<NormalizedPath>;

    /// Side files written next to every artifact of this layout.
    fn digest_algorithms(&self) -> &'static [ChecksumAlgorithm];

    /// How this layout's clients expect side-file digests to be written.
    fn side_file_encodings(&self) -> SideFileEncodings {
        SideFileEncodings::new()
    }

    /// Whether `primary` (already stripped of any side-file suffix) is
    /// layout metadata.
    fn is_metadata(&self, _primary: &NormalizedPath) -> bool {
        false
    }

    /// Directory whose metadata summarizes `coordinates`, if the layout
    /// keeps any.
    fn metadata_base(&self, _coordinates: &ArtifactCoordinates) -> Option<NormalizedPath> {
        None
    }

    /// Regenerate aggregate metadata for everything under `base`.
    fn rebuild_metadata(
        &self,
        _repository_root: &Path,
        _base: &NormalizedPath,
        _config: RobustnessConfig,
    ) -> Result<MetadataReport> {
        Ok(MetadataReport::default())
    }

    /// Classify any repository-relative path.
    fn classify(&self, path: &NormalizedPath) -> Result<PathClass> {
        if path.is_root() {
            return Err(Error::parse(self.kind(), "", "empty path"));
        }
        let (side_file, primary) = match ChecksumAlgorithm::split_side_file(path.as_str()) {
            Some((algorithm, primary)) => (Some(algorithm), NormalizedPath::new(primary)?),
            None => (None, path.clone()),
        };
        if self.is_metadata(&primary) {
            return Ok(PathClass::Metadata { side_file });
        }
        let coordinates = self.parse_artifact(&primary)?;
        Ok(PathClass::Artifact(ParsedPath {
            coordinates,
            side_file,
        }))
    }

    /// Parse an artifact or side-file path into coordinates.
    fn parse(&self, path: &NormalizedPath) -> Result<ParsedPath> {
        match self.classify(path)? {
            PathClass::Artifact(parsed) => Ok(parsed),
            PathClass::Metadata { .. } => Err(Error::parse(
                self.kind(),
                path.as_str(),
                "layout metadata is not an artifact",
            )),
        }
    }

    /// Error for coordinates that belong to another layout.
    fn mismatch(&self, coordinates: &ArtifactCoordinates) -> Error {
        Error::LayoutMismatch {
            expected: self.kind(),
            found: coordinates.layout(),
        }
    }
}

/// Reject empty or slash-bearing single-segment coordinate fields.
pub(crate) fn require_segment(layout: LayoutKind, field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid(layout, format!("{} must not be empty", field)));
    }
    if value.contains('/') || value.contains('\\') || value.starts_with('.') {
        return Err(Error::invalid(
            layout,
            format!("{} '{}' is not a valid path segment", field, value),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("maven", LayoutKind::Maven)]
    #[case("Maven 2", LayoutKind::Maven)]
    #[case("MAVEN2", LayoutKind::Maven)]
    #[case(" nuget ", LayoutKind::Nuget)]
    #[case("pypi", LayoutKind::Pypi)]
    #[case("rpm", LayoutKind::Rpm)]
    #[case("raw", LayoutKind::Raw)]
    fn test_alias_lookup(#[case] alias: &str, #[case] expected: LayoutKind) {
        assert_eq!(alias.parse::<LayoutKind>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_alias_is_unsupported() {
        assert!(matches!(
            "npm".parse::<LayoutKind>(),
            Err(Error::UnsupportedLayout { .. })
        ));
    }
}
