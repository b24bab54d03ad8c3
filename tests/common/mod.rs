//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use repokeeper::core::builder::{BuildJob, BuildOutcome, BuildRunner};
use repokeeper::core::config::Configuration;
use repokeeper::core::lock::BuildLocks;
use repokeeper::core::metadata::Metadata;
use repokeeper::core::package::Package;
use repokeeper::core::scheduler::BuildScheduler;
use repokeeper::core::store::RepositoryStore;
use repokeeper::core::version::PackageVersion;
use repokeeper::error::BuildError;
use repokeeper::infra::dirs::RepositoryPaths;

/// Test repository context
///
/// Creates a temporary repository root and provides utilities for setting
/// up test scenarios.
pub struct TestRepo {
    /// Temporary directory holding the repository root
    pub dir: TempDir,
}

impl TestRepo {
    /// Create a new repository in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Repository root
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("repo")
    }

    /// Repository layout
    pub fn paths(&self) -> RepositoryPaths {
        RepositoryPaths::new(self.root(), "x86_64")
    }

    /// Configuration rooted in the temporary directory
    pub fn config(&self) -> Configuration {
        let mut config = Configuration::default();
        config.repository.root = self.root();
        config.repository.architecture = "x86_64".to_string();
        config
    }

    /// Write the metadata file used by the default configuration
    pub fn write_metadata(&self, metadata: &str) {
        self.create_file("repo/metadata.json", metadata);
    }

    /// Write a configuration file and return its path
    pub fn write_config(&self, content: &str) -> PathBuf {
        self.create_file("config.toml", content);
        self.dir.path().join("config.toml")
    }

    /// Create a file relative to the temporary directory
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Files published in the repository directory
    pub fn published(&self) -> BTreeSet<String> {
        list_files(&self.paths().repository())
    }

    /// Open a scheduler over a fresh store
    pub fn scheduler(&self, runner: FakeRunner, max_concurrency: usize) -> (Arc<BuildScheduler<FakeRunner>>, Arc<RepositoryStore>) {
        let paths = self.paths();
        paths.ensure().expect("Failed to create repository layout");
        let store = Arc::new(RepositoryStore::open(&paths.state()).expect("Failed to open store"));
        let scheduler = BuildScheduler::new(runner, Arc::clone(&store), BuildLocks::new(paths.locks()), paths)
            .with_max_concurrency(max_concurrency);
        (Arc::new(scheduler), store)
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// File names directly inside `dir`
pub fn list_files(dir: &Path) -> BTreeSet<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return BTreeSet::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect()
}

/// Package with a single sub-package and the given dependencies
pub fn pkg(base: &str, version: &str, depends: &[&str]) -> Package {
    Package::new(base, PackageVersion::parse(version).expect("Invalid version"))
        .with_depends(depends.iter().copied())
}

/// Metadata over packages
pub fn metadata(packages: Vec<Package>) -> Metadata {
    Metadata::new(packages)
}

/// Build runner that fakes the external build tool
///
/// Writes `<sub>-<version>-any.pkg.tar.zst` for every sub-package into the
/// build root and records how builds overlapped.
#[derive(Default)]
pub struct FakeRunner {
    failing: HashSet<String>,
    without_artifacts: HashSet<String>,
    broken_records: HashMap<String, PathBuf>,
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
    active: Mutex<HashSet<String>>,
    overlapped: AtomicBool,
    invoked: Mutex<Vec<String>>,
    pkgbuilds: Mutex<Vec<(String, String)>>,
}

impl FakeRunner {
    /// Runner where every build succeeds immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Make builds of `base` exit with code 1
    #[must_use]
    pub fn failing(mut self, base: &str) -> Self {
        self.failing.insert(base.to_string());
        self
    }

    /// Make builds of `base` succeed without producing artifacts
    #[must_use]
    pub fn without_artifacts(mut self, base: &str) -> Self {
        self.without_artifacts.insert(base.to_string());
        self
    }

    /// Replace the record file of `base` in `state` with a directory while it builds
    #[must_use]
    pub fn breaking_record(mut self, base: &str, state: &Path) -> Self {
        self.broken_records.insert(base.to_string(), state.join(format!("{base}.json")));
        self
    }

    /// Make every build take `delay`
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Bases the build tool was started for, in start order
    pub fn invoked(&self) -> Vec<String> {
        self.invoked.lock().clone()
    }

    /// PKGBUILD contents each build root held, in start order
    pub fn pkgbuilds(&self) -> Vec<(String, String)> {
        self.pkgbuilds.lock().clone()
    }

    /// Highest number of simultaneous builds seen
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Check if the same base was ever built twice at once
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    fn finish(&self, base: &str) {
        self.active.lock().remove(base);
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BuildRunner for FakeRunner {
    async fn run(&self, job: &BuildJob, cancel: CancellationToken) -> Result<BuildOutcome, BuildError> {
        let base = job.package.base.clone();
        self.invoked.lock().push(base.clone());
        if let Ok(pkgbuild) = std::fs::read_to_string(job.build_root.join("PKGBUILD")) {
            self.pkgbuilds.lock().push((base.clone(), pkgbuild));
        }
        if !self.active.lock().insert(base.clone()) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        if let Some(parent) = job.log_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create log directory");
        }
        std::fs::write(&job.log_path, format!("building {base}\n")).expect("Failed to write log");

        tokio::select! {
            () = tokio::time::sleep(self.delay) => {}
            () = cancel.cancelled() => {
                self.finish(&base);
                return Err(BuildError::Cancelled { base });
            }
        }

        if self.failing.contains(&base) {
            self.finish(&base);
            return Ok(BuildOutcome::exited(1));
        }
        if let Some(record) = self.broken_records.get(&base) {
            std::fs::remove_file(record).expect("Failed to remove record");
            std::fs::create_dir(record).expect("Failed to block record");
        }
        if !self.without_artifacts.contains(&base) {
            for name in &job.package.sub_packages {
                let file = format!("{name}-{}-any.pkg.tar.zst", job.package.version);
                std::fs::write(job.build_root.join(file), format!("{name} {}", job.package.version))
                    .expect("Failed to write artifact");
            }
        }
        self.finish(&base);
        Ok(BuildOutcome::success())
    }
}

/// Build script for the real binary
///
/// Creates one artifact per sub-package; fails for bases listed in
/// `$FAIL_BASES`.
pub const BUILD_SCRIPT: &str = r#"
for fail in $FAIL_BASES; do
  if [ "$fail" = "$REPOKEEPER_BASE" ]; then echo "failing on purpose" >&2; exit 2; fi
done
for name in $REPOKEEPER_PACKAGES; do
  echo "packaging $name"
  echo "$name" > "$name-$REPOKEEPER_VERSION-any.pkg.tar.zst"
done
"#;

/// Run the repokeeper binary
pub fn repokeeper(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_repokeeper"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run repokeeper")
}
