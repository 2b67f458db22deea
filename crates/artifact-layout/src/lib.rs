//! Artifact coordinate codecs for the artifact manager
//!
//! Each supported ecosystem implements [`LayoutFormat`]: a bidirectional
//! mapping between [`ArtifactCoordinates`] and repository-relative paths,
//! plus aggregate metadata generation where the ecosystem has any.
//! Layouts are selected by alias through [`LayoutRegistry`].

pub mod coordinates;
pub mod error;
pub mod format;
pub mod maven;
pub mod nuget;
pub mod pypi;
pub mod raw;
pub mod registry;
pub mod rpm;

pub use coordinates::{ArtifactCoordinates, CoordinateFields};
pub use error::{Error, Result};
pub use format::{LayoutFormat, LayoutKind, MetadataReport, ParsedPath, PathClass};
pub use maven::{MavenCoordinates, MavenLayout};
pub use nuget::{NugetCoordinates, NugetLayout, NugetPackageKind};
pub use pypi::{PypiCoordinates, PypiDistribution, PypiLayout};
pub use raw::{RawCoordinates, RawLayout};
pub use registry::LayoutRegistry;
pub use rpm::{RpmCoordinates, RpmLayout};
