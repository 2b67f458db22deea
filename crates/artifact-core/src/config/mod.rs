//! Configuration of storages and repositories
//!
//! The core only reads configuration: a [`Configuration`] document loaded
//! by [`ConfigStore`] (TOML, JSON or YAML) and looked up through
//! [`ConfigurationSource`].

mod model;
mod store;

pub use model::{
    Configuration, GroupConfig, IoConfig, RemoteConfig, Repository, RepositoryPolicy,
    RepositoryRef, RepositoryStatus, RepositoryType, Storage,
};
pub use store::{ConfigFormat, ConfigStore};

use std::fmt;

use crate::{Error, Result};

/// Read access to the repository configuration.
pub trait ConfigurationSource: Send + Sync + fmt::Debug {
    fn configuration(&self) -> &Configuration;

    fn repository(&self, storage_id: &str, repository_id: &str) -> Result<&Repository> {
        let storage = self
            .configuration()
            .storage(storage_id)
            .ok_or_else(|| Error::StorageNotFound {
                storage_id: storage_id.to_string(),
            })?;
        storage
            .repository(repository_id)
            .ok_or_else(|| Error::RepositoryNotFound {
                storage_id: storage_id.to_string(),
                repository_id: repository_id.to_string(),
            })
    }
}

impl ConfigurationSource for Configuration {
    fn configuration(&self) -> &Configuration {
        self
    }
}
