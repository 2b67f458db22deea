//! Layout lookup by repository alias

use std::collections::HashMap;
use std::sync::Arc;

use crate::format::{LayoutFormat, LayoutKind};
use crate::maven::MavenLayout;
use crate::nuget::NugetLayout;
use crate::pypi::PypiLayout;
use crate::raw::RawLayout;
use crate::rpm::RpmLayout;
use crate::{Error, Result};

/// Maps layout aliases (as written in repository configuration) to their
/// implementations.
///
/// # Example
///
/// ```
/// use artifact_layout::{LayoutKind, LayoutRegistry};
///
/// let registry = LayoutRegistry::with_builtins();
/// assert_eq!(registry.get("Maven 2").unwrap().kind(), LayoutKind::Maven);
/// assert!(registry.get("npm").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct LayoutRegistry {
    layouts: HashMap<String, Arc<dyn LayoutFormat>>,
}

impl LayoutRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in layout under all its aliases.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_kind(Arc::new(MavenLayout));
        registry.register_kind(Arc::new(NugetLayout));
        registry.register_kind(Arc::new(PypiLayout));
        registry.register_kind(Arc::new(RpmLayout));
        registry.register_kind(Arc::new(RawLayout));
        registry
    }

    /// Register `layout` under every alias of its kind.
    pub fn register_kind(&mut self, layout: Arc<dyn LayoutFormat>) {
        for alias in layout.kind().aliases() {
            self.register(*alias, Arc::clone(&layout));
        }
    }

    /// Register `layout` under one alias, replacing any previous entry.
    pub fn register(&mut self, alias: impl Into<String>, layout: Arc<dyn LayoutFormat>) {
        let alias: String = alias.into();
        self.layouts.insert(alias.trim().to_ascii_lowercase(), layout);
    }

    /// Look a layout up by alias, case-insensitively.
    pub fn get(&self, alias: &str) -> Result<Arc<dyn LayoutFormat>> {
        self.layouts
            .get(&alias.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| Error::UnsupportedLayout {
                alias: alias.to_string(),
            })
    }

    /// Look a layout up by kind.
    pub fn get_kind(&self, kind: LayoutKind) -> Result<Arc<dyn LayoutFormat>> {
        self.get(kind.as_str())
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.get(alias).is_ok()
    }

    /// All registered aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.layouts.keys().cloned().collect();
        aliases.sort();
        aliases
    }
}
