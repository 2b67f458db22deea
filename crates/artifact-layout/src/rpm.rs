//! RPM layout: `[dir/]name-version-release.arch.rpm`
//!
//! The name may contain `-`; version and release may not, so the file stem
//! is split from the right.

use artifact_fs::{ChecksumAlgorithm, NormalizedPath};
use serde::{Deserialize, Serialize};

use crate::coordinates::ArtifactCoordinates;
use crate::format::{LayoutFormat, LayoutKind, require_segment};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpmCoordinates {
    /// Directory the package is filed under, relative to the repository root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    pub name: String,
    pub version: String,
    pub release: String,
    #[serde(rename = "architecture")]
    pub arch: String,
}

impl RpmCoordinates {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        release: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            directory: None,
            name: name.into(),
            version: version.into(),
            release: release.into(),
            arch: arch.into(),
        }
    }

    pub fn in_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    fn validate(&self) -> Result<()> {
        require_segment(LayoutKind::Rpm, "name", &self.name)?;
        for (field, value) in [
            ("version", &self.version),
            ("release", &self.release),
            ("architecture", &self.arch),
        ] {
            require_segment(LayoutKind::Rpm, field, value)?;
            if value.contains('-') {
                return Err(Error::invalid(
                    LayoutKind::Rpm,
                    format!("{} '{}' must not contain '-'", field, value),
                ));
            }
        }
        if self.arch.contains('.') {
            return Err(Error::invalid(LayoutKind::Rpm, "architecture must not contain '.'"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RpmLayout;

const DIGESTS: &[ChecksumAlgorithm] = &[ChecksumAlgorithm::Sha256];

impl LayoutFormat for RpmLayout {
    fn kind(&self) -> LayoutKind {
        LayoutKind::Rpm
    }

    fn parse_artifact(&self, path: &NormalizedPath) -> Result<ArtifactCoordinates> {
        let error = |reason: &str| Error::parse(LayoutKind::Rpm, path.as_str(), reason);

        let file_name = path.file_name().ok_or_else(|| error("empty path"))?;
        let stem = file_name
            .strip_suffix(".rpm")
            .ok_or_else(|| error("missing .rpm extension"))?;
        let (nvr, arch) = stem
            .rsplit_once('.')
            .ok_or_else(|| error("missing architecture"))?;
        let (nv, release) = nvr.rsplit_once('-').ok_or_else(|| error("missing release"))?;
        let (name, version) = nv.rsplit_once('-').ok_or_else(|| error("missing version"))?;

        let coordinates = RpmCoordinates {
            directory: path.parent().filter(|p| !p.is_root()).map(String::from),
            name: name.to_string(),
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
        };
        coordinates
            .validate()
            .map_err(|e| error(&e.to_string()))?;
        Ok(ArtifactCoordinates::Rpm(coordinates))
    }

    fn to_path(&self, coordinates: &ArtifactCoordinates) -> Result<NormalizedPath> {
        let ArtifactCoordinates::Rpm(c) = coordinates else {
            return Err(self.mismatch(coordinates));
        };
        c.validate()?;
        let file_name = format!("{}-{}-{}.{}.rpm", c.name, c.version, c.release, c.arch);
        let path = match &c.directory {
            Some(directory) => NormalizedPath::new(directory)?.join(&file_name)?,
            None => NormalizedPath::new(&file_name)?,
        };
        Ok(path)
    }

    fn digest_algorithms(&self) -> &'static [ChecksumAlgorithm] {
        DIGESTS
    }
}
