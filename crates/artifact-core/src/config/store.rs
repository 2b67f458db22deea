//! Loading and saving the configuration document

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use artifact_fs::{RobustnessConfig, write_atomic};
use fs2::FileExt;
use tracing::{debug, info};

use super::model::Configuration;
use crate::{Error, Result};

/// Serialization format, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            _ => Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn parse(&self, content: &str) -> std::result::Result<Configuration, String> {
        match self {
            Self::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            Self::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        }
    }

    pub fn render(&self, config: &Configuration) -> std::result::Result<String, String> {
        match self {
            Self::Toml => toml::to_string_pretty(config).map_err(|e| e.to_string()),
            Self::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::to_string(config).map_err(|e| e.to_string()),
        }
    }
}

/// File-backed configuration document.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    format: ConfigFormat,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = ConfigFormat::from_path(&path)?;
        Ok(Self { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document under a shared lock.
    pub fn load(&self) -> Result<Configuration> {
        let file = File::open(&self.path).map_err(|e| artifact_fs::Error::io(&self.path, e))?;
        file.lock_shared()
            .map_err(|_| artifact_fs::Error::LockFailed {
                path: self.path.clone(),
            })?;

        // Read through the locked handle
        let mut content = String::new();
        (&file)
            .read_to_string(&mut content)
            .map_err(|e| artifact_fs::Error::io(&self.path, e))?;

        let config = self.format.parse(&content).map_err(|message| Error::ConfigParse {
            path: self.path.clone(),
            message,
        })?;
        info!(path = %self.path.display(), storages = config.storages.len(), "loaded configuration");
        Ok(config)
    }

    /// Write the document atomically.
    pub fn save(&self, config: &Configuration) -> Result<()> {
        let content = self.format.render(config).map_err(|message| Error::ConfigParse {
            path: self.path.clone(),
            message,
        })?;
        write_atomic(&self.path, content.as_bytes(), RobustnessConfig::default())?;
        debug!(path = %self.path.display(), "saved configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("config.toml", ConfigFormat::Toml)]
    #[case("config.JSON", ConfigFormat::Json)]
    #[case("config.yml", ConfigFormat::Yaml)]
    #[case("config.yaml", ConfigFormat::Yaml)]
    fn test_format_detection(#[case] name: &str, #[case] expected: ConfigFormat) {
        assert_eq!(ConfigFormat::from_path(Path::new(name)).unwrap(), expected);
    }

    #[test]
    fn test_unknown_extension() {
        assert!(matches!(
            ConfigFormat::from_path(Path::new("config.ini")),
            Err(Error::UnsupportedFormat { .. })
        ));
    }
}
