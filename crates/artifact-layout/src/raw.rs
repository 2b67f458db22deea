//! Raw layout: the path is the identity.

use artifact_fs::{ChecksumAlgorithm, NormalizedPath};
use serde::{Deserialize, Serialize};

use crate::coordinates::ArtifactCoordinates;
use crate::format::{LayoutFormat, LayoutKind};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawCoordinates {
    pub path: String,
}

impl RawCoordinates {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawLayout;

const DIGESTS: &[ChecksumAlgorithm] = &[ChecksumAlgorithm::Md5, ChecksumAlgorithm::Sha1];

impl LayoutFormat for RawLayout {
    fn kind(&self) -> LayoutKind {
        LayoutKind::Raw
    }

    fn parse_artifact(&self, path: &NormalizedPath) -> Result<ArtifactCoordinates> {
        if path.is_root() {
            return Err(Error::parse(LayoutKind::Raw, "", "empty path"));
        }
        Ok(ArtifactCoordinates::Raw(RawCoordinates::new(path.as_str())))
    }

    fn to_path(&self, coordinates: &ArtifactCoordinates) -> Result<NormalizedPath> {
        let ArtifactCoordinates::Raw(c) = coordinates else {
            return Err(self.mismatch(coordinates));
        };
        let path = NormalizedPath::new(&c.path)?;
        // Only canonical paths are identities
        if path.is_root() || path.as_str() != c.path {
            return Err(Error::invalid(
                LayoutKind::Raw,
                format!("'{}' is not a canonical path", c.path),
            ));
        }
        Ok(path)
    }

    fn digest_algorithms(&self) -> &'static [ChecksumAlgorithm] {
        DIGESTS
    }
}
