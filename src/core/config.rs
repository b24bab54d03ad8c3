//! Repository configuration
//!
//! Reads `config.toml`: repository layout, build tool settings, signing and
//! the ordered trigger list. Every value has a default, so a missing file
//! yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::defaults;
use crate::core::lock::LockPolicy;
use crate::core::package::validate_base;
use crate::core::patch::PkgbuildPatch;
use crate::infra::dirs::RepositoryPaths;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },

    /// Values are inconsistent
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Full repokeeper configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Configuration {
    /// Repository settings
    #[serde(default)]
    pub repository: RepositorySettings,

    /// Build settings
    #[serde(default)]
    pub build: BuildSettings,

    /// Signing settings
    #[serde(default)]
    pub sign: SignSettings,

    /// Post-cycle triggers in run order
    #[serde(default, rename = "trigger")]
    pub triggers: Vec<TriggerSettings>,
}

/// Repository settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepositorySettings {
    /// Repository name used in reports
    pub name: String,

    /// Root of all repository data
    pub root: PathBuf,

    /// Target architecture
    pub architecture: String,

    /// Metadata file, defaults to `<root>/metadata.json`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PathBuf>,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            name: defaults::DEFAULT_REPOSITORY_NAME.to_string(),
            root: PathBuf::from(defaults::DEFAULT_ROOT),
            architecture: defaults::DEFAULT_ARCHITECTURE.to_string(),
            metadata: None,
        }
    }
}

/// Build settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildSettings {
    /// External build tool
    pub command: String,

    /// Arguments passed to the build tool
    pub args: Vec<String>,

    /// Maximum number of simultaneous builds
    pub max_concurrency: usize,

    /// Behaviour when a base is already being built
    pub lock_policy: LockPolicy,

    /// Per-build time limit in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Extra environment for the build tool
    pub env: BTreeMap<String, String>,

    /// Container isolation
    pub sandbox: SandboxSettings,

    /// PKGBUILD overrides applied in every build root
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PkgbuildPatch>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            command: defaults::DEFAULT_BUILD_COMMAND.to_string(),
            args: defaults::DEFAULT_BUILD_ARGS
                .iter()
                .map(|arg| (*arg).to_string())
                .collect(),
            max_concurrency: defaults::DEFAULT_MAX_CONCURRENCY,
            lock_policy: LockPolicy::default(),
            timeout_secs: None,
            env: BTreeMap::new(),
            sandbox: SandboxSettings::default(),
            patches: Vec::new(),
        }
    }
}

/// Container isolation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxSettings {
    /// Run builds inside a container
    pub enabled: bool,

    /// Container image
    pub image: String,

    /// Allow network access inside the container
    pub network: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            image: defaults::DEFAULT_SANDBOX_IMAGE.to_string(),
            network: true,
        }
    }
}

/// What gets signed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignTarget {
    /// Built package artifacts
    Packages,
}

/// Signing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignSettings {
    /// Enabled signing targets; empty disables signing
    pub targets: Vec<SignTarget>,

    /// Signing key id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Signing tool
    pub command: String,
}

impl Default for SignSettings {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            key: None,
            command: defaults::DEFAULT_SIGN_COMMAND.to_string(),
        }
    }
}

impl SignSettings {
    /// Check if artifacts must be signed
    pub fn signs_packages(&self) -> bool {
        self.targets.contains(&SignTarget::Packages)
    }
}

/// One configured trigger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerSettings {
    /// Unique trigger name
    pub name: String,

    /// Registered trigger type
    #[serde(rename = "type")]
    pub kind: String,

    /// Abort the remaining triggers when this one fails
    #[serde(default)]
    pub required: bool,

    /// Type-specific settings
    #[serde(default)]
    pub settings: toml::Table,
}

impl Configuration {
    /// Load configuration from a specific path
    ///
    /// A missing file yields the default configuration.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    ///
    /// Creates parent directories if they don't exist.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError {
                path: parent.display().to_string(),
                error: e.to_string(),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        fs::write(path, content).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        if self.build.max_concurrency == 0 {
            return invalid("build.max_concurrency must be at least 1".to_string());
        }
        if self.build.command.trim().is_empty() {
            return invalid("build.command must not be empty".to_string());
        }
        if self.sign.signs_packages() && self.sign.key.is_none() {
            return invalid("sign.key is required when signing targets are set".to_string());
        }

        for patch in &self.build.patches {
            if !patch.has_valid_key() {
                return invalid(format!("invalid PKGBUILD patch key '{}'", patch.key));
            }
            if let Some(base) = &patch.base {
                if validate_base(base).is_err() {
                    return invalid(format!("invalid base '{base}' in PKGBUILD patch"));
                }
            }
        }

        let mut names = BTreeSet::new();
        for trigger in &self.triggers {
            if !names.insert(trigger.name.as_str()) {
                return invalid(format!("duplicate trigger name '{}'", trigger.name));
            }
        }
        Ok(())
    }

    /// Directory layout of the repository
    pub fn paths(&self) -> RepositoryPaths {
        RepositoryPaths::new(&self.repository.root, &self.repository.architecture)
    }

    /// Effective metadata file
    pub fn metadata_path(&self) -> PathBuf {
        self.repository
            .metadata
            .clone()
            .unwrap_or_else(|| self.repository.root.join(defaults::METADATA_FILE))
    }
}
