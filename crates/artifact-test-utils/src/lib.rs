//! Shared test fixtures for the artifact-manager workspace.
//!
//! A dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`storage`]: [`TestStorage`], a temporary base directory plus configuration
//! - [`remote`]: [`FakeRemote`], a scriptable in-memory remote endpoint
//! - [`events`]: [`RecordingListener`], captures published events

pub mod events;
pub mod remote;
pub mod storage;

pub use events::RecordingListener;
pub use remote::FakeRemote;
pub use storage::TestStorage;
