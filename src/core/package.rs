//! Package definition handling
//!
//! A [`Package`] is one buildable base as described by the metadata fetcher:
//! its version, the sub-packages it produces, its declared dependencies and
//! where its build description comes from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use regex::Regex;

use crate::core::version::PackageVersion;
use crate::error::PackageError;

/// Suffixes marking packages built from a VCS head
const VCS_SUFFIXES: &[&str] = &["-bzr", "-cvs", "-darcs", "-git", "-hg", "-svn"];

/// Characters that terminate a dependency name and start its version constraint
const CONSTRAINT_CHARS: &[char] = &['<', '>', '='];

/// A buildable package base
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
    /// Package base name
    pub base: String,

    /// Full version
    pub version: PackageVersion,

    /// Names of the sub-packages produced by this base
    #[serde(default)]
    pub sub_packages: Vec<String>,

    /// Runtime dependencies
    #[serde(default)]
    pub depends: Vec<String>,

    /// Build-time dependencies
    #[serde(default)]
    pub make_depends: Vec<String>,

    /// Where the build description comes from
    #[serde(default)]
    pub source: PackageSource,
}

/// Origin of a package build description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PackageSource {
    /// Community-hosted description
    Aur {
        /// Upstream URL
        #[serde(default)]
        url: Option<String>,
        /// Package submitter or maintainer
        #[serde(default)]
        submitter: Option<String>,
    },

    /// Officially distributed package
    Official {
        /// Official repository name
        #[serde(default)]
        repository: Option<String>,
    },

    /// Local build description
    #[default]
    Local,
}

impl Package {
    /// Create a package producing a single sub-package named like its base
    pub fn new(base: impl Into<String>, version: PackageVersion) -> Self {
        let base = base.into();
        Self {
            sub_packages: vec![base.clone()],
            base,
            version,
            depends: Vec::new(),
            make_depends: Vec::new(),
            source: PackageSource::Local,
        }
    }

    /// Set runtime dependencies
    #[must_use]
    pub fn with_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = depends.into_iter().map(Into::into).collect();
        self
    }

    /// Set build-time dependencies
    #[must_use]
    pub fn with_make_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.make_depends = depends.into_iter().map(Into::into).collect();
        self
    }

    /// Set produced sub-packages
    #[must_use]
    pub fn with_sub_packages<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_packages = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the source origin
    #[must_use]
    pub fn with_source(mut self, source: PackageSource) -> Self {
        self.source = source;
        self
    }

    /// Validate the package for use as a repository entry
    pub fn validate(&self) -> Result<(), PackageError> {
        validate_base(&self.base)?;
        if self.sub_packages.is_empty() {
            return Err(PackageError::ParseError(format!(
                "package '{}' produces no sub-packages",
                self.base
            )));
        }
        Ok(())
    }

    /// Names provided by this base: the base itself and every sub-package
    pub fn provided_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.base.as_str()).chain(self.sub_packages.iter().map(String::as_str))
    }

    /// Normalised dependency names, excluding packages of this base
    ///
    /// Includes both runtime and build-time dependencies.
    pub fn dependency_names(&self) -> BTreeSet<String> {
        let own: BTreeSet<&str> = self.provided_names().collect();
        self.depends
            .iter()
            .chain(&self.make_depends)
            .map(|dep| normalize_dependency(dep))
            .filter(|dep| !dep.is_empty() && !own.contains(dep.as_str()))
            .collect()
    }

    /// Check if the package is built from a VCS head
    pub fn is_vcs(&self) -> bool {
        VCS_SUFFIXES.iter().any(|suffix| self.base.ends_with(suffix))
    }

    /// Check if `remote` carries a newer version of this package
    pub fn is_outdated(&self, remote: &Package) -> bool {
        remote.version.is_newer_than(&self.version)
    }

    /// Web page of the package for community-hosted sources
    pub fn web_url(&self) -> Option<&str> {
        match &self.source {
            PackageSource::Aur { url, .. } => url.as_deref(),
            _ => None,
        }
    }

    /// Expected artifact file pattern for a sub-package
    ///
    /// Artifacts are named `<name>-<version>-<arch>.pkg.tar[.ext]` where
    /// `arch` is either the repository architecture or `any`.
    pub fn artifact_pattern(
        &self,
        sub_package: &str,
        architecture: &str,
    ) -> Result<Regex, PackageError> {
        let pattern = format!(
            r"^{}-{}-(?:any|{})\.pkg\.tar(?:\.[a-z0-9]+)?$",
            regex::escape(sub_package),
            regex::escape(&self.version.to_string()),
            regex::escape(architecture),
        );
        Regex::new(&pattern).map_err(|e| PackageError::ParseError(format!("Invalid regex: {e}")))
    }
}

/// Strip a version constraint from a dependency declaration
///
/// `foo>=1.2` becomes `foo`, `bar: optional` style descriptions are cut at the colon.
pub fn normalize_dependency(dependency: &str) -> String {
    let name = dependency.split(':').next().unwrap_or_default();
    name.split(CONSTRAINT_CHARS)
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Check that a base name can be used as a repository key
pub fn validate_base(base: &str) -> Result<(), PackageError> {
    let valid = !base.is_empty()
        && !base.starts_with('.')
        && !base.starts_with('-')
        && base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '+' | '-'));
    if valid {
        Ok(())
    } else {
        Err(PackageError::InvalidBase {
            base: base.to_string(),
        })
    }
}

/// Check if a file name looks like a package artifact
pub fn is_package_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains(".pkg.") && !name.ends_with(".sig"))
}
