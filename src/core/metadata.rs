//! Package metadata input
//!
//! The metadata fetcher writes one JSON document listing every managed
//! package descriptor plus the names provided by the distribution's own
//! repositories:
//!
//! ```json
//! {
//!   "packages": [{ "base": "foo", "version": "1.0-1", "depends": ["glibc"] }],
//!   "external": ["glibc"]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::core::package::Package;
use crate::error::PackageError;

/// Package descriptors consumed by the resolver
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    /// Managed package descriptors, in fetcher order
    #[serde(default)]
    pub packages: Vec<Package>,

    /// Names satisfied by the distribution's official repositories
    #[serde(default)]
    pub external: BTreeSet<String>,
}

impl Metadata {
    /// Create metadata from descriptors
    pub fn new(packages: Vec<Package>) -> Self {
        Self {
            packages,
            external: BTreeSet::new(),
        }
    }

    /// Set externally provided names
    #[must_use]
    pub fn with_external<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.external = names.into_iter().map(Into::into).collect();
        self
    }

    /// Load metadata from a JSON file
    ///
    /// A missing file yields empty metadata.
    pub fn load_from_path(path: &Path) -> Result<Self, PackageError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            PackageError::ParseError(format!("Failed to read '{}': {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Parse metadata from a JSON string
    ///
    /// Descriptors without sub-packages produce a single package named like
    /// their base.
    pub fn from_json(content: &str) -> Result<Self, PackageError> {
        let mut metadata: Self =
            serde_json::from_str(content).map_err(|e| PackageError::ParseError(e.to_string()))?;
        for package in &mut metadata.packages {
            if package.sub_packages.is_empty() {
                package.sub_packages.push(package.base.clone());
            }
        }
        Ok(metadata)
    }

    /// Find a descriptor by base name
    pub fn get(&self, base: &str) -> Option<&Package> {
        self.packages.iter().find(|package| package.base == base)
    }

    /// Find the base providing `name`, either as base or as sub-package
    pub fn base_providing(&self, name: &str) -> Option<&str> {
        self.get(name).map(|package| package.base.as_str()).or_else(|| {
            self.packages
                .iter()
                .find(|package| package.sub_packages.iter().any(|sub| sub == name))
                .map(|package| package.base.as_str())
        })
    }
}
