//! Repository directory layout
//!
//! Everything repokeeper writes lives under one repository root:
//!
//! - `chroot/` - isolated build roots, one temporary directory per build
//! - `logs/<base>/` - captured build output
//! - `sources/<base>/` - fetched build descriptions
//! - `repository/<arch>/` - published artifacts
//! - `state/` - one record per base
//! - `locks/` - per-base build locks
//!
//! The configuration file location can be overridden with `REPOKEEPER_CONFIG`.

use std::env;
use std::path::{Path, PathBuf};

use crate::infra::filesystem;

/// Environment variable overriding the configuration file path
pub const ENV_CONFIG: &str = "REPOKEEPER_CONFIG";

/// Application name used in directory paths
const APP_NAME: &str = "repokeeper";

const CHROOT_SUBDIR: &str = "chroot";
const LOGS_SUBDIR: &str = "logs";
const SOURCES_SUBDIR: &str = "sources";
const REPOSITORY_SUBDIR: &str = "repository";
const STATE_SUBDIR: &str = "state";
const LOCKS_SUBDIR: &str = "locks";

/// Paths of one repository instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPaths {
    root: PathBuf,
    architecture: String,
}

impl RepositoryPaths {
    /// Create the layout for a root and architecture
    pub fn new(root: impl Into<PathBuf>, architecture: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            architecture: architecture.into(),
        }
    }

    /// Repository root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Repository architecture
    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// Parent of all build roots
    #[must_use]
    pub fn chroot(&self) -> PathBuf {
        self.root.join(CHROOT_SUBDIR)
    }

    /// Parent of all build logs
    #[must_use]
    pub fn logs(&self) -> PathBuf {
        self.root.join(LOGS_SUBDIR)
    }

    /// Build logs of one base
    #[must_use]
    pub fn logs_for(&self, base: &str) -> PathBuf {
        self.logs().join(base)
    }

    /// Parent of all fetched build descriptions
    #[must_use]
    pub fn sources(&self) -> PathBuf {
        self.root.join(SOURCES_SUBDIR)
    }

    /// Fetched build description of one base
    #[must_use]
    pub fn sources_for(&self, base: &str) -> PathBuf {
        self.sources().join(base)
    }

    /// Published artifacts of the configured architecture
    #[must_use]
    pub fn repository(&self) -> PathBuf {
        self.root.join(REPOSITORY_SUBDIR).join(&self.architecture)
    }

    /// State record directory
    #[must_use]
    pub fn state(&self) -> PathBuf {
        self.root.join(STATE_SUBDIR)
    }

    /// Build lock directory
    #[must_use]
    pub fn locks(&self) -> PathBuf {
        self.root.join(LOCKS_SUBDIR)
    }

    /// Lock file of one base
    #[must_use]
    pub fn lock_for(&self, base: &str) -> PathBuf {
        self.locks().join(format!("{base}.lock"))
    }

    /// Path relative to the root, for references stored in records
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Create every directory of the layout
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [
            self.chroot(),
            self.logs(),
            self.sources(),
            self.repository(),
            self.state(),
            self.locks(),
        ] {
            filesystem::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Default configuration file path
///
/// `$REPOKEEPER_CONFIG`, otherwise `<config dir>/repokeeper/config.toml`.
#[must_use]
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(ENV_CONFIG) {
        return PathBuf::from(path);
    }

    dirs::config_dir()
        .map(|p| p.join(APP_NAME))
        .unwrap_or_else(|| {
            // Fallback to home directory
            dirs::home_dir()
                .map(|h| h.join(".config").join(APP_NAME))
                .unwrap_or_else(|| PathBuf::from(".").join(".config").join(APP_NAME))
        })
        .join("config.toml")
}
