//! NuGet flat-container layout: `Id/Version/Id.Version.nupkg|.nuspec`
//!
//! The package's SHA-512 lives in `Id.Version.nupkg.sha512`, base64 encoded
//! the way NuGet clients read it. Each package id directory carries an
//! `index.json` listing its versions.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::Path;

use artifact_fs::checksum::compute_content_checksums;
use artifact_fs::{
    ChecksumAlgorithm, DigestEncoding, NormalizedPath, RobustnessConfig, SideFileEncodings, io,
    write_atomic,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::coordinates::ArtifactCoordinates;
use crate::format::{LayoutFormat, LayoutKind, MetadataReport, require_segment};
use crate::maven::version::compare_versions;
use crate::{Error, Result};

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NugetPackageKind {
    Nupkg,
    Nuspec,
}

impl NugetPackageKind {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Nupkg => "nupkg",
            Self::Nuspec => "nuspec",
        }
    }

    fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "nupkg" => Some(Self::Nupkg),
            "nuspec" => Some(Self::Nuspec),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NugetCoordinates {
    pub id: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: NugetPackageKind,
}

impl NugetCoordinates {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            kind: NugetPackageKind::Nupkg,
        }
    }

    pub fn nuspec(mut self) -> Self {
        self.kind = NugetPackageKind::Nuspec;
        self
    }
}

/// `index.json` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionIndex {
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NugetLayout;

const DIGESTS: &[ChecksumAlgorithm] = &[ChecksumAlgorithm::Sha512];

/// SemVer order where both sides parse, Maven-style order otherwise.
fn compare_nuget_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => compare_versions(a, b),
    }
}

impl NugetLayout {
    fn error(path: &NormalizedPath, reason: impl Into<String>) -> Error {
        Error::parse(LayoutKind::Nuget, path.as_str(), reason)
    }

    fn write_index(
        &self,
        repository_root: &Path,
        id_dir: &str,
        config: RobustnessConfig,
    ) -> Result<Option<NormalizedPath>> {
        let mut versions = BTreeSet::new();
        for file in io::list_files(&repository_root.join(id_dir))? {
            let relative = NormalizedPath::from_native(repository_root, &file)?;
            if let Ok(ArtifactCoordinates::Nuget(c)) = self.parse_artifact(&relative) {
                if c.kind == NugetPackageKind::Nupkg {
                    versions.insert(c.version);
                }
            }
        }

        let target = NormalizedPath::new(format!("{}/{}", id_dir, INDEX_FILE))?;
        if versions.is_empty() {
            return Ok(None);
        }
        let mut versions: Vec<String> = versions.into_iter().collect();
        versions.sort_by(|a, b| compare_nuget_versions(a, b));

        let content = serde_json::to_vec_pretty(&VersionIndex { versions })?;
        write_atomic(&target.to_native(repository_root), &content, config)?;
        let encodings = self.side_file_encodings();
        for (algorithm, digest) in compute_content_checksums(&content, DIGESTS) {
            let rendered = encodings.get(&algorithm).copied().unwrap_or_default().render(&digest);
            write_atomic(
                &target.side_file(algorithm)?.to_native(repository_root),
                rendered.as_bytes(),
                config,
            )?;
        }
        debug!(path = %target, "wrote nuget version index");
        Ok(Some(target))
    }
}

impl LayoutFormat for NugetLayout {
    fn kind(&self) -> LayoutKind {
        LayoutKind::Nuget
    }

    fn parse_artifact(&self, path: &NormalizedPath) -> Result<ArtifactCoordinates> {
        let segments: Vec<&str> = path.segments().collect();
        let [id, version, file_name] = segments.as_slice() else {
            return Err(Self::error(path, "expected Id/Version/Id.Version.nupkg"));
        };
        let (stem, extension) = file_name
            .rsplit_once('.')
            .ok_or_else(|| Self::error(path, "missing extension"))?;
        let kind = NugetPackageKind::from_extension(extension)
            .ok_or_else(|| Self::error(path, format!("unsupported extension '{}'", extension)))?;
        if stem != format!("{}.{}", id, version) {
            return Err(Self::error(
                path,
                format!("file name must be '{}.{}.{}'", id, version, extension),
            ));
        }
        Ok(ArtifactCoordinates::Nuget(NugetCoordinates {
            id: id.to_string(),
            version: version.to_string(),
            kind,
        }))
    }

    fn to_path(&self, coordinates: &ArtifactCoordinates) -> Result<NormalizedPath> {
        let ArtifactCoordinates::Nuget(c) = coordinates else {
            return Err(self.mismatch(coordinates));
        };
        require_segment(LayoutKind::Nuget, "id", &c.id)?;
        require_segment(LayoutKind::Nuget, "version", &c.version)?;
        Ok(NormalizedPath::new(format!(
            "{id}/{version}/{id}.{version}.{ext}",
            id = c.id,
            version = c.version,
            ext = c.kind.extension()
        ))?)
    }

    fn digest_algorithms(&self) -> &'static [ChecksumAlgorithm] {
        DIGESTS
    }

    /// NuGet clients read `.sha512` side files as base64.
    fn side_file_encodings(&self) -> SideFileEncodings {
        SideFileEncodings::from([(ChecksumAlgorithm::Sha512, DigestEncoding::Base64)])
    }

    fn is_metadata(&self, primary: &NormalizedPath) -> bool {
        primary.segments().count() == 2 && primary.file_name() == Some(INDEX_FILE)
    }

    fn metadata_base(&self, coordinates: &ArtifactCoordinates) -> Option<NormalizedPath> {
        match coordinates {
            ArtifactCoordinates::Nuget(c) => NormalizedPath::new(&c.id).ok(),
            _ => None,
        }
    }

    fn rebuild_metadata(
        &self,
        repository_root: &Path,
        base: &NormalizedPath,
        config: RobustnessConfig,
    ) -> Result<MetadataReport> {
        let mut id_dirs = BTreeSet::new();
        let mut existing = BTreeSet::new();
        for file in io::list_files(&base.to_native(repository_root))? {
            let relative = NormalizedPath::from_native(repository_root, &file)?;
            if ChecksumAlgorithm::split_side_file(relative.as_str()).is_some() {
                continue;
            }
            if self.is_metadata(&relative) {
                existing.insert(relative);
            } else if let Ok(ArtifactCoordinates::Nuget(c)) = self.parse_artifact(&relative) {
                id_dirs.insert(c.id);
            }
        }
        // an emptied id directory leaves only its index behind
        for index in &existing {
            if let Some(parent) = index.parent() {
                id_dirs.insert(parent.as_str().to_string());
            }
        }

        let mut report = MetadataReport::default();
        for id_dir in id_dirs {
            match self.write_index(repository_root, &id_dir, config)? {
                Some(written) => report.written.push(written),
                None => {
                    let target = NormalizedPath::new(format!("{}/{}", id_dir, INDEX_FILE))?;
                    let native = target.to_native(repository_root);
                    if io::remove_if_exists(&native)? {
                        for algorithm in ChecksumAlgorithm::ALL {
                            io::remove_if_exists(
                                &target.side_file(algorithm)?.to_native(repository_root),
                            )?;
                        }
                        if let Some(parent) = native.parent() {
                            io::prune_empty_dirs(parent, repository_root);
                        }
                        report.removed.push(target);
                    }
                }
            }
        }
        info!(base = %base, written = report.written.len(), removed = report.removed.len(), "rebuilt nuget metadata");
        Ok(report)
    }
}
