//! `maven-metadata.xml` generation
//!
//! Artifact-level metadata lists every version directory that still holds a
//! parseable artifact. Snapshot version directories additionally get
//! version-level metadata mapping each classifier/extension to its newest
//! timestamped build.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use artifact_fs::checksum::compute_content_checksums;
use artifact_fs::{ChecksumAlgorithm, NormalizedPath, RobustnessConfig, io, write_atomic};
use chrono::Utc;
use tracing::{debug, info};

use super::version::{compare_versions, snapshot_build};
use super::{DIGESTS, MavenCoordinates, MavenLayout};
use crate::coordinates::ArtifactCoordinates;
use crate::format::{LayoutFormat, MetadataReport};
use crate::{Error, Result};

pub const METADATA_FILE: &str = "maven-metadata.xml";

/// One `<snapshotVersion>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SnapshotVersion {
    classifier: Option<String>,
    extension: String,
    value: String,
    updated: String,
    build: u32,
}

pub(super) fn rebuild(
    layout: &MavenLayout,
    repository_root: &Path,
    base: &NormalizedPath,
    config: RobustnessConfig,
) -> Result<MetadataReport> {
    let mut artifact_dirs = BTreeSet::new();
    let mut existing = BTreeSet::new();

    for file in io::list_files(&base.to_native(repository_root))? {
        let relative = NormalizedPath::from_native(repository_root, &file)?;
        let primary = match ChecksumAlgorithm::split_side_file(relative.as_str()) {
            Some(_) => continue,
            None => relative,
        };
        if layout.is_metadata(&primary) {
            existing.insert(primary);
            continue;
        }
        if let Ok(ArtifactCoordinates::Maven(c)) = layout.parse_artifact(&primary) {
            artifact_dirs.insert(c.artifact_dir());
        }
    }

    let last_updated = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let mut report = MetadataReport::default();

    for dir in &artifact_dirs {
        let versions = scan_artifact_dir(layout, repository_root, dir)?;
        let Some(first) = versions.values().flatten().next() else {
            continue;
        };
        let (group_id, artifact_id) = (first.group_id.clone(), first.artifact_id.clone());

        let target = metadata_path(dir)?;
        let xml = artifact_metadata(&group_id, &artifact_id, versions.keys(), &last_updated);
        write_with_digests(repository_root, &target, &xml, config)?;
        report.written.push(target);

        for (base_version, files) in versions.iter().filter(|(v, _)| v.ends_with("-SNAPSHOT")) {
            let target = metadata_path(&format!("{}/{}", dir, base_version.0))?;
            let xml = snapshot_metadata(&group_id, &artifact_id, base_version, files, &last_updated);
            write_with_digests(repository_root, &target, &xml, config)?;
            report.written.push(target);
        }
    }

    for stale in existing {
        if report.written.contains(&stale) {
            continue;
        }
        let native = stale.to_native(repository_root);
        io::remove_if_exists(&native)?;
        for algorithm in ChecksumAlgorithm::ALL {
            io::remove_if_exists(&stale.side_file(algorithm)?.to_native(repository_root))?;
        }
        if let Some(parent) = native.parent() {
            io::prune_empty_dirs(parent, repository_root);
        }
        debug!(path = %stale, "removed stale maven metadata");
        report.removed.push(stale);
    }

    info!(
        base = %base,
        written = report.written.len(),
        removed = report.removed.len(),
        "rebuilt maven metadata"
    );
    Ok(report)
}

/// Parsed artifacts of one `groupId/artifactId` directory, keyed by version
/// directory in ascending Maven order.
fn scan_artifact_dir(
    layout: &MavenLayout,
    repository_root: &Path,
    dir: &str,
) -> Result<BTreeMap<VersionKey, Vec<MavenCoordinates>>> {
    let mut versions: BTreeMap<VersionKey, Vec<MavenCoordinates>> = BTreeMap::new();
    let native = repository_root.join(dir);
    for file in io::list_files(&native)? {
        let relative = NormalizedPath::from_native(repository_root, &file)?;
        if ChecksumAlgorithm::split_side_file(relative.as_str()).is_some() {
            continue;
        }
        let Ok(ArtifactCoordinates::Maven(c)) = layout.parse_artifact(&relative) else {
            continue;
        };
        if c.artifact_dir() != dir {
            continue;
        }
        versions
            .entry(VersionKey(c.base_version()))
            .or_default()
            .push(c);
    }
    Ok(versions)
}

fn metadata_path(dir: &str) -> Result<NormalizedPath> {
    NormalizedPath::new(format!("{}/{}", dir, METADATA_FILE)).map_err(|e| Error::Metadata {
        path: dir.to_string(),
        message: e.to_string(),
    })
}

fn write_with_digests(
    repository_root: &Path,
    target: &NormalizedPath,
    content: &str,
    config: RobustnessConfig,
) -> Result<()> {
    write_atomic(&target.to_native(repository_root), content.as_bytes(), config)?;
    for (algorithm, digest) in compute_content_checksums(content.as_bytes(), DIGESTS) {
        write_atomic(
            &target.side_file(algorithm)?.to_native(repository_root),
            digest.as_bytes(),
            config,
        )?;
    }
    Ok(())
}

/// Version directory name ordered the Maven way.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionKey(String);

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        compare_versions(&self.0, &other.0).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::ops::Deref for VersionKey {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn artifact_metadata<'a>(
    group_id: &str,
    artifact_id: &str,
    versions: impl DoubleEndedIterator<Item = &'a VersionKey> + Clone,
    last_updated: &str,
) -> String {
    let latest = versions.clone().next_back();
    let release = versions
        .clone()
        .rev()
        .find(|v| !v.ends_with("-SNAPSHOT"));

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata>\n");
    let _ = writeln!(xml, "  <groupId>{}</groupId>", escape(group_id));
    let _ = writeln!(xml, "  <artifactId>{}</artifactId>", escape(artifact_id));
    xml.push_str("  <versioning>\n");
    if let Some(latest) = latest {
        let _ = writeln!(xml, "    <latest>{}</latest>", escape(latest));
    }
    if let Some(release) = release {
        let _ = writeln!(xml, "    <release>{}</release>", escape(release));
    }
    xml.push_str("    <versions>\n");
    for version in versions {
        let _ = writeln!(xml, "      <version>{}</version>", escape(version));
    }
    xml.push_str("    </versions>\n");
    let _ = writeln!(xml, "    <lastUpdated>{}</lastUpdated>", last_updated);
    xml.push_str("  </versioning>\n</metadata>\n");
    xml
}

fn snapshot_versions(files: &[MavenCoordinates], last_updated: &str) -> Vec<SnapshotVersion> {
    let mut newest: BTreeMap<(Option<String>, String), SnapshotVersion> = BTreeMap::new();
    for c in files {
        let (value, updated, build) = match snapshot_build(&c.version) {
            Some((timestamp, build)) => (c.version.clone(), timestamp.replace('.', ""), build),
            None => (c.version.clone(), last_updated.to_string(), 0),
        };
        let entry = SnapshotVersion {
            classifier: c.classifier.clone(),
            extension: c.extension.clone(),
            value,
            updated,
            build,
        };
        let key = (c.classifier.clone(), c.extension.clone());
        match newest.get(&key) {
            Some(current) if current.build >= entry.build => {}
            _ => {
                newest.insert(key, entry);
            }
        }
    }
    newest.into_values().collect()
}

fn snapshot_metadata(
    group_id: &str,
    artifact_id: &str,
    base_version: &str,
    files: &[MavenCoordinates],
    last_updated: &str,
) -> String {
    let latest_build = files
        .iter()
        .filter_map(|c| snapshot_build(&c.version))
        .max_by_key(|(_, build)| *build);

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata modelVersion=\"1.1.0\">\n");
    let _ = writeln!(xml, "  <groupId>{}</groupId>", escape(group_id));
    let _ = writeln!(xml, "  <artifactId>{}</artifactId>", escape(artifact_id));
    let _ = writeln!(xml, "  <version>{}</version>", escape(base_version));
    xml.push_str("  <versioning>\n    <snapshot>\n");
    match latest_build {
        Some((timestamp, build)) => {
            let _ = writeln!(xml, "      <timestamp>{}</timestamp>", timestamp);
            let _ = writeln!(xml, "      <buildNumber>{}</buildNumber>", build);
        }
        None => xml.push_str("      <localCopy>true</localCopy>\n"),
    }
    xml.push_str("    </snapshot>\n");
    let _ = writeln!(xml, "    <lastUpdated>{}</lastUpdated>", last_updated);
    xml.push_str("    <snapshotVersions>\n");
    for entry in snapshot_versions(files, last_updated) {
        xml.push_str("      <snapshotVersion>\n");
        if let Some(classifier) = &entry.classifier {
            let _ = writeln!(xml, "        <classifier>{}</classifier>", escape(classifier));
        }
        let _ = writeln!(xml, "        <extension>{}</extension>", escape(&entry.extension));
        let _ = writeln!(xml, "        <value>{}</value>", escape(&entry.value));
        let _ = writeln!(xml, "        <updated>{}</updated>", entry.updated);
        xml.push_str("      </snapshotVersion>\n");
    }
    xml.push_str("    </snapshotVersions>\n  </versioning>\n</metadata>\n");
    xml
}
