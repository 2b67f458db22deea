//! PyPI layout: `name/version/file`
//!
//! `file` is an sdist (`name-version.tar.gz` / `name-version.zip`) or a
//! wheel (`name-version[-build]-python-abi-platform.whl`). Distribution
//! names use `_` in place of `-`, as wheel file names require.

use artifact_fs::{ChecksumAlgorithm, NormalizedPath};
use serde::{Deserialize, Serialize};

use crate::coordinates::ArtifactCoordinates;
use crate::format::{LayoutFormat, LayoutKind, require_segment};
use crate::{Error, Result};

const SDIST_EXTENSIONS: &[&str] = &["tar.gz", "zip"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "packaging", rename_all = "lowercase")]
pub enum PypiDistribution {
    Sdist {
        extension: String,
    },
    Wheel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        build: Option<String>,
        python: String,
        abi: String,
        platform: String,
    },
}

impl PypiDistribution {
    pub fn packaging(&self) -> &'static str {
        match self {
            Self::Sdist { .. } => "sdist",
            Self::Wheel { .. } => "wheel",
        }
    }

    /// Compatibility tags as named fields.
    pub fn tags(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Sdist { extension } => vec![("extension", extension.as_str())],
            Self::Wheel {
                build,
                python,
                abi,
                platform,
            } => {
                let mut tags = vec![("python", python.as_str()), ("abi", abi.as_str()), ("platform", platform.as_str())];
                if let Some(build) = build {
                    tags.push(("build", build.as_str()));
                }
                tags
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PypiCoordinates {
    pub name: String,
    pub version: String,
    #[serde(flatten)]
    pub distribution: PypiDistribution,
}

impl PypiCoordinates {
    pub fn sdist(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            distribution: PypiDistribution::Sdist {
                extension: "tar.gz".to_string(),
            },
        }
    }

    pub fn wheel(
        name: impl Into<String>,
        version: impl Into<String>,
        python: impl Into<String>,
        abi: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            distribution: PypiDistribution::Wheel {
                build: None,
                python: python.into(),
                abi: abi.into(),
                platform: platform.into(),
            },
        }
    }

    fn file_name(&self) -> String {
        match &self.distribution {
            PypiDistribution::Sdist { extension } => {
                format!("{}-{}.{}", self.name, self.version, extension)
            }
            PypiDistribution::Wheel {
                build: Some(build),
                python,
                abi,
                platform,
            } => format!(
                "{}-{}-{}-{}-{}-{}.whl",
                self.name, self.version, build, python, abi, platform
            ),
            PypiDistribution::Wheel {
                build: None,
                python,
                abi,
                platform,
            } => format!(
                "{}-{}-{}-{}-{}.whl",
                self.name, self.version, python, abi, platform
            ),
        }
    }

    fn validate(&self) -> Result<()> {
        let no_dash = |field: &str, value: &str| -> Result<()> {
            require_segment(LayoutKind::Pypi, field, value)?;
            if value.contains('-') {
                return Err(Error::invalid(
                    LayoutKind::Pypi,
                    format!("{} '{}' must not contain '-'", field, value),
                ));
            }
            Ok(())
        };
        no_dash("name", &self.name)?;
        no_dash("version", &self.version)?;
        match &self.distribution {
            PypiDistribution::Sdist { extension } => {
                if !SDIST_EXTENSIONS.contains(&extension.as_str()) {
                    return Err(Error::invalid(
                        LayoutKind::Pypi,
                        format!("unsupported sdist extension '{}'", extension),
                    ));
                }
            }
            PypiDistribution::Wheel {
                build,
                python,
                abi,
                platform,
            } => {
                if let Some(build) = build {
                    no_dash("build", build)?;
                    if !build.starts_with(|c: char| c.is_ascii_digit()) {
                        return Err(Error::invalid(
                            LayoutKind::Pypi,
                            "build tag must start with a digit",
                        ));
                    }
                }
                no_dash("python", python)?;
                no_dash("abi", abi)?;
                no_dash("platform", platform)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PypiLayout;

const DIGESTS: &[ChecksumAlgorithm] = &[ChecksumAlgorithm::Sha256];

impl PypiLayout {
    fn error(path: &NormalizedPath, reason: impl Into<String>) -> Error {
        Error::parse(LayoutKind::Pypi, path.as_str(), reason)
    }

    fn parse_file(name: &str, version: &str, file_name: &str) -> Option<PypiDistribution> {
        if let Some(stem) = file_name.strip_suffix(".whl") {
            let parts: Vec<&str> = stem.split('-').collect();
            let (build, tags) = match parts.as_slice() {
                [n, v, python, abi, platform] if *n == name && *v == version => {
                    (None, [*python, *abi, *platform])
                }
                [n, v, build, python, abi, platform] if *n == name && *v == version => {
                    (Some(build.to_string()), [*python, *abi, *platform])
                }
                _ => return None,
            };
            if tags.iter().any(|t| t.is_empty()) {
                return None;
            }
            let [python, abi, platform] = tags;
            return Some(PypiDistribution::Wheel {
                build,
                python: python.to_string(),
                abi: abi.to_string(),
                platform: platform.to_string(),
            });
        }

        let prefix = format!("{}-{}.", name, version);
        let extension = file_name.strip_prefix(&prefix)?;
        SDIST_EXTENSIONS
            .contains(&extension)
            .then(|| PypiDistribution::Sdist {
                extension: extension.to_string(),
            })
    }
}

impl LayoutFormat for PypiLayout {
    fn kind(&self) -> LayoutKind {
        LayoutKind::Pypi
    }

    fn parse_artifact(&self, path: &NormalizedPath) -> Result<ArtifactCoordinates> {
        let segments: Vec<&str> = path.segments().collect();
        let [name, version, file_name] = segments.as_slice() else {
            return Err(Self::error(path, "expected name/version/file"));
        };
        let distribution = Self::parse_file(name, version, file_name).ok_or_else(|| {
            Self::error(
                path,
                format!("'{}' is neither an sdist nor a wheel of {} {}", file_name, name, version),
            )
        })?;
        let coordinates = PypiCoordinates {
            name: name.to_string(),
            version: version.to_string(),
            distribution,
        };
        coordinates
            .validate()
            .map_err(|e| Self::error(path, e.to_string()))?;
        Ok(ArtifactCoordinates::Pypi(coordinates))
    }

    fn to_path(&self, coordinates: &ArtifactCoordinates) -> Result<NormalizedPath> {
        let ArtifactCoordinates::Pypi(c) = coordinates else {
            return Err(self.mismatch(coordinates));
        };
        c.validate()?;
        Ok(NormalizedPath::new(format!(
            "{}/{}/{}",
            c.name,
            c.version,
            c.file_name()
        ))?)
    }

    fn digest_algorithms(&self) -> &'static [ChecksumAlgorithm] {
        DIGESTS
    }
}
