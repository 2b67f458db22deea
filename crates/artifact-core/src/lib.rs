//! Repository orchestration layer for the artifact manager
//!
//! This crate sits above the storage (`artifact-fs`) and codec
//! (`artifact-layout`) crates and implements:
//!
//! - **Configuration**: storages and repositories loaded from TOML, JSON or YAML
//! - **Layout providers**: write rules, copy/move, metadata and checksum upkeep
//! - **Repository providers**: hosted, caching proxy and ordered group topologies
//! - **Index coordinator**: per-repository indexes maintained off the write path
//! - **ArtifactService**: the operation surface tying it all together
//!
//! # Architecture
//!
//! ```text
//!                ArtifactService
//!                       |
//!       +---------------+----------------+
//!       |               |                |
//!  Repository      EventBus -----> IndexCoordinator
//!  providers            ^
//!       |               |
//!  LayoutProvider ------+
//!       |
//!  +----+-----+
//!  |          |
//! artifact-fs artifact-layout
//! ```
//!
//! # Example
//!
//! ```ignore
//! use artifact_core::{ArtifactService, Configuration, Repository, Storage};
//!
//! let config = Configuration::new("/var/lib/artifacts")
//!     .with_storage(Storage::new("storage0").with_repository(Repository::hosted("releases", "maven2")));
//! let service = ArtifactService::builder(config).build()?;
//! service.store("storage0", "releases", "com/acme/lib/1.0/lib-1.0.jar", &b"..."[..], Default::default())?;
//! ```

pub mod config;
pub mod entries;
pub mod error;
pub mod events;
pub mod index;
pub mod layout_provider;
pub mod logging;
pub mod remote;
pub mod repository;
pub mod service;
pub mod single_flight;

pub use config::{
    ConfigFormat, ConfigStore, Configuration, ConfigurationSource, GroupConfig, IoConfig,
    RemoteConfig, Repository, RepositoryPolicy, RepositoryRef, RepositoryStatus, RepositoryType,
    Storage,
};
pub use entries::{ArtifactEntry, ArtifactEntryStore, InMemoryEntryStore};
pub use error::{Error, Result};
pub use events::{ArtifactEvent, EventBus, EventListener, EventPublisher};
pub use index::{IndexCoordinator, IndexEntry, IndexRebuildReport, RepositoryIndex};
pub use layout_provider::{ArtifactOutputStream, ChecksumReport, LayoutProvider};
pub use remote::{ConnectionPool, NoRemoteClient, RemoteClient, RemoteError, RemoteResponse};
pub use repository::{
    CacheState, FAILED_STATE_CAPACITY, GroupRepositoryProvider, HostedRepositoryProvider,
    ProxyRepositoryProvider, RepositoryProvider, SearchResult, StorageContext,
};
pub use service::{ArtifactLocation, ArtifactService, ArtifactServiceBuilder, SearchRequest, TrashScope};
pub use single_flight::SingleFlight;
