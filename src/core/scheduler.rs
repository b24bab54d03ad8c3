//! Build scheduling
//!
//! Drives one update cycle over a [`Resolution`]: bases start in build order
//! as soon as every in-graph dependency succeeded, at most
//! `max_concurrency` at a time. Each build holds the base's build lock and
//! runs in its own build root. A successful build is verified against the
//! artifact naming convention, optionally signed, published into the
//! repository directory and committed to the store. A failed base fails all
//! of its transitive dependents without building them.
//!
//! Cancellation stops new bases from starting and terminates running
//! builds; successes already committed stay committed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::defaults;
use crate::core::builder::{BuildJob, BuildRunner};
use crate::core::lock::{BuildLocks, LockPolicy};
use crate::core::package::Package;
use crate::core::patch::PkgbuildPatch;
use crate::core::resolver::Resolution;
use crate::core::status::{unix_now, BuildStatus, BuildStatusKind, FailureKind, FailureReason};
use crate::core::store::RepositoryStore;
use crate::error::{BuildError, StoreError};
use crate::infra::buildroot::BuildRoot;
use crate::infra::dirs::RepositoryPaths;
use crate::infra::filesystem;
use crate::infra::sign::ArtifactSigner;

/// Result of one update cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Final status of every base the cycle touched
    pub outcomes: BTreeMap<String, BuildStatus>,
    /// Unresolved dependency names of flagged bases
    pub warnings: BTreeMap<String, BTreeSet<String>>,
    /// Requested names nothing provides
    pub unknown: BTreeSet<String>,
    /// Bases for which the build tool was started
    pub attempted: BTreeSet<String>,
}

impl CycleReport {
    /// Bases built successfully
    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, status)| status.status == BuildStatusKind::Success)
            .map(|(base, _)| base.as_str())
    }

    /// Failed bases with their reasons
    pub fn failed(&self) -> impl Iterator<Item = (&str, Option<&FailureReason>)> {
        self.outcomes
            .iter()
            .filter(|(_, status)| status.status == BuildStatusKind::Failed)
            .map(|(base, status)| (base.as_str(), status.reason.as_ref()))
    }

    /// Check if every requested base succeeded
    pub fn is_success(&self) -> bool {
        self.unknown.is_empty() && self.failed().next().is_none()
    }

    /// Check if some but not all bases succeeded
    pub fn is_partial(&self) -> bool {
        self.succeeded().next().is_some() && !self.is_success()
    }

    /// Every base the cycle touched
    pub fn changed_bases(&self) -> BTreeSet<String> {
        self.outcomes.keys().cloned().collect()
    }
}

/// Executes build cycles
pub struct BuildScheduler<R: BuildRunner> {
    runner: Arc<R>,
    store: Arc<RepositoryStore>,
    locks: Arc<BuildLocks>,
    paths: RepositoryPaths,
    signer: Option<Arc<dyn ArtifactSigner>>,
    patches: Vec<PkgbuildPatch>,
    max_concurrency: usize,
    lock_policy: LockPolicy,
}

impl<R: BuildRunner> BuildScheduler<R> {
    /// Create a scheduler with default limits
    pub fn new(
        runner: R,
        store: Arc<RepositoryStore>,
        locks: Arc<BuildLocks>,
        paths: RepositoryPaths,
    ) -> Self {
        Self {
            runner: Arc::new(runner),
            store,
            locks,
            paths,
            signer: None,
            patches: Vec::new(),
            max_concurrency: defaults::DEFAULT_MAX_CONCURRENCY,
            lock_policy: LockPolicy::default(),
        }
    }

    /// Set the maximum number of simultaneous builds
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Set the behaviour for bases already being built
    #[must_use]
    pub fn with_lock_policy(mut self, lock_policy: LockPolicy) -> Self {
        self.lock_policy = lock_policy;
        self
    }

    /// Sign artifacts before publishing
    #[must_use]
    pub fn with_signer(mut self, signer: Option<Arc<dyn ArtifactSigner>>) -> Self {
        self.signer = signer;
        self
    }

    /// Patch build descriptions before building
    #[must_use]
    pub fn with_patches(mut self, patches: Vec<PkgbuildPatch>) -> Self {
        self.patches = patches;
        self
    }

    /// Build runner in use
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run one cycle over `resolution`
    pub async fn run(self: &Arc<Self>, resolution: &Resolution, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport {
            warnings: resolution.unresolved.clone(),
            unknown: resolution.unknown.clone(),
            ..CycleReport::default()
        };

        self.record_resolution_failures(resolution, &mut report);

        let position: HashMap<&str, usize> = resolution
            .order
            .iter()
            .enumerate()
            .map(|(index, base)| (base.as_str(), index))
            .collect();
        let mut waiting: HashMap<&str, usize> = HashMap::new();
        let mut ready = BTreeSet::new();

        for base in &resolution.order {
            let package = &resolution.packages[base];
            match self.store.set_status(package, BuildStatus::pending()) {
                Ok(()) | Err(StoreError::InvalidTransition { .. }) => {}
                Err(e) => {
                    let reason = FailureReason::new(FailureKind::Storage, e.to_string());
                    self.fail(resolution, base, reason, &mut report);
                    continue;
                }
            }
        }

        for (index, base) in resolution.order.iter().enumerate() {
            if report.outcomes.contains_key(base) {
                continue;
            }
            let count = resolution.graph.dependencies(base).count();
            if count == 0 {
                ready.insert(index);
            } else {
                waiting.insert(base.as_str(), count);
            }
        }

        tracing::info!(
            "Building {} package(s) with up to {} in parallel",
            ready.len() + waiting.len(),
            self.max_concurrency
        );

        let mut running: JoinSet<(String, BuildStatus)> = JoinSet::new();
        loop {
            while running.len() < self.max_concurrency && !cancel.is_cancelled() {
                let Some(index) = ready.pop_first() else {
                    break;
                };
                let base = &resolution.order[index];
                if report.outcomes.contains_key(base) {
                    continue;
                }
                let package = resolution.packages[base].clone();
                let scheduler = Arc::clone(self);
                let cancel = cancel.clone();
                let span = tracing::info_span!("build", base = %package.base);
                running.spawn(
                    async move {
                        let base = package.base.clone();
                        let status = AssertUnwindSafe(scheduler.build(package.clone(), cancel))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                tracing::error!("Build task for '{}' panicked", base);
                                let reason =
                                    FailureReason::new(FailureKind::Build, "build task panicked");
                                let status = BuildStatus::failed(reason);
                                if let Err(e) = scheduler.store.set_status(&package, status.clone()) {
                                    tracing::error!("Failed to record failure of '{}': {}", base, e);
                                }
                                status
                            });
                        (base, status)
                    }
                    .instrument(span),
                );
                report.attempted.insert(base.clone());
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (base, status) = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("Build task failed to complete: {}", e);
                    continue;
                }
            };

            if status.status == BuildStatusKind::Success {
                tracing::info!("Built {}", base);
                for dependent in resolution.graph.dependents(&base) {
                    let Some(count) = waiting.get_mut(dependent) else {
                        continue;
                    };
                    *count -= 1;
                    if *count == 0 {
                        waiting.remove(dependent);
                        if let Some(&index) = position.get(dependent) {
                            ready.insert(index);
                        }
                    }
                }
                report.outcomes.insert(base, status);
            } else {
                if let Some(reason) = &status.reason {
                    tracing::warn!("Build of {} failed: {}", base, reason);
                }
                report.outcomes.insert(base.clone(), status);
                self.fail_dependents(resolution, &base, cancel.is_cancelled(), &mut report);
            }
        }

        for base in &resolution.order {
            if report.outcomes.contains_key(base) {
                continue;
            }
            let reason = FailureReason::new(FailureKind::Cancelled, "cycle cancelled before build");
            let status = BuildStatus::failed(reason);
            self.record(&resolution.packages[base], status.clone());
            report.outcomes.insert(base.clone(), status);
        }

        report
    }

    fn record_resolution_failures(&self, resolution: &Resolution, report: &mut CycleReport) {
        for (base, error) in &resolution.failures {
            let status = BuildStatus::failed(FailureReason::new(FailureKind::Resolution, error.to_string()));
            self.record(&resolution.packages[base], status.clone());
            report.outcomes.insert(base.clone(), status);
        }
        for (base, blockers) in &resolution.blocked {
            let blocker = blockers.iter().next().map_or("", String::as_str);
            let status = BuildStatus::failed(FailureReason::dependency(blocker));
            self.record(&resolution.packages[base], status.clone());
            report.outcomes.insert(base.clone(), status);
        }
    }

    /// Fail `base` and everything depending on it
    fn fail(&self, resolution: &Resolution, base: &str, reason: FailureReason, report: &mut CycleReport) {
        let status = BuildStatus::failed(reason);
        self.record(&resolution.packages[base], status.clone());
        report.outcomes.insert(base.to_string(), status);
        self.fail_dependents(resolution, base, false, report);
    }

    /// Fail everything depending on `base`, as cancelled if the cycle was
    fn fail_dependents(&self, resolution: &Resolution, base: &str, cancelled: bool, report: &mut CycleReport) {
        for (dependent, via) in resolution.graph.transitive_dependents(base) {
            if report.outcomes.contains_key(&dependent) {
                continue;
            }
            let reason = if cancelled {
                tracing::warn!("Skipping {}: cycle cancelled", dependent);
                FailureReason {
                    kind: FailureKind::Cancelled,
                    message: "cycle cancelled before build".to_string(),
                    failed_dependency: Some(via),
                }
            } else {
                tracing::warn!("Skipping {}: dependency {} failed", dependent, via);
                FailureReason::dependency(&via)
            };
            let status = BuildStatus::failed(reason);
            self.record(&resolution.packages[&dependent], status.clone());
            report.outcomes.insert(dependent, status);
        }
    }

    fn record(&self, package: &Package, status: BuildStatus) {
        if let Err(e) = self.store.set_status(package, status) {
            tracing::error!("Failed to record status of '{}': {}", package.base, e);
        }
    }

    /// Build one base and record its final status
    async fn build(&self, package: Package, cancel: CancellationToken) -> BuildStatus {
        let mut log_reference = None;
        let result = self.execute(&package, &cancel, &mut log_reference).await;
        match result {
            Ok(status) => status,
            Err(reason) => {
                let status = BuildStatus::failed(reason).with_log(log_reference);
                self.record(&package, status.clone());
                status
            }
        }
    }

    async fn execute(
        &self,
        package: &Package,
        cancel: &CancellationToken,
        log_reference: &mut Option<String>,
    ) -> Result<BuildStatus, FailureReason> {
        let base = package.base.as_str();
        let _lock = self
            .locks
            .acquire(base, self.lock_policy, cancel)
            .await
            .map_err(build_failure)?;
        if cancel.is_cancelled() {
            return Err(FailureReason::new(FailureKind::Cancelled, "cycle cancelled"));
        }

        let storage = |e: StoreError| FailureReason::new(FailureKind::Storage, e.to_string());
        self.store
            .set_status(package, BuildStatus::building())
            .map_err(storage)?;

        let build_root = BuildRoot::create(&self.paths.chroot(), base, &self.paths.sources_for(base), &self.patches)
            .map_err(|e| {
                FailureReason::new(FailureKind::Build, format!("failed to prepare build root: {e}"))
            })?;

        let log_path = self
            .paths
            .logs_for(base)
            .join(format!("{}-{}.log", package.version, unix_now()));
        *log_reference = Some(self.paths.relative(&log_path));

        let job = BuildJob {
            package: package.clone(),
            build_root: build_root.path().to_path_buf(),
            log_path,
            architecture: self.paths.architecture().to_string(),
        };
        tracing::info!("Building {} {}", base, package.version);
        let outcome = self
            .runner
            .run(&job, cancel.clone())
            .await
            .map_err(build_failure)?;
        if !outcome.is_success() {
            let message = match outcome.exit_code {
                Some(code) => format!("build tool exited with code {code}"),
                None => "build tool was killed by a signal".to_string(),
            };
            return Err(FailureReason::new(FailureKind::Build, message));
        }

        let artifacts = self.verify_artifacts(package, &build_root)?;
        let signatures = self.sign(artifacts.clone()).await?;
        let files: Vec<PathBuf> = artifacts.into_iter().chain(signatures).collect();

        // re-read under the build lock, another process may have published since
        let previous = self
            .store
            .reload(base)
            .map_err(storage)?
            .map(|record| record.artifacts)
            .unwrap_or_default();
        let published = self.publish(&files, &previous)?;

        let status = BuildStatus::success().with_log(log_reference.clone());
        if let Err(e) = self
            .store
            .upsert(base, package.clone(), status.clone(), published.clone())
        {
            self.unpublish(published.difference(&previous));
            return Err(storage(e));
        }
        self.unpublish(previous.difference(&published));

        if let Err(e) = build_root.close() {
            tracing::debug!("Build root cleanup for '{}' failed: {}", base, e);
        }
        Ok(status)
    }

    /// Match the build root contents against the expected artifacts
    fn verify_artifacts(&self, package: &Package, build_root: &BuildRoot) -> Result<Vec<PathBuf>, FailureReason> {
        let verification = |message: String| FailureReason::new(FailureKind::ArtifactVerification, message);
        let candidates = build_root
            .artifacts()
            .map_err(|e| verification(format!("failed to list build root: {e}")))?;

        let mut found = Vec::new();
        let mut missing = Vec::new();
        for sub_package in &package.sub_packages {
            let pattern = package
                .artifact_pattern(sub_package, self.paths.architecture())
                .map_err(|e| verification(e.to_string()))?;
            let matches: Vec<&PathBuf> = candidates
                .iter()
                .filter(|path| {
                    path.file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| pattern.is_match(name))
                })
                .collect();
            if matches.is_empty() {
                missing.push(sub_package.as_str());
            }
            found.extend(matches.into_iter().cloned());
        }

        if !missing.is_empty() {
            return Err(verification(format!("missing artifacts for {}", missing.join(", "))));
        }
        Ok(found)
    }

    async fn sign(&self, artifacts: Vec<PathBuf>) -> Result<Vec<PathBuf>, FailureReason> {
        let Some(signer) = self.signer.clone() else {
            return Ok(Vec::new());
        };
        let signing = tokio::task::spawn_blocking(move || {
            artifacts
                .iter()
                .map(|artifact| signer.sign(artifact))
                .collect::<Result<Vec<_>, _>>()
        });
        match signing.await {
            Ok(result) => result.map_err(|e| FailureReason::new(FailureKind::Sign, e.to_string())),
            Err(e) => Err(FailureReason::new(FailureKind::Sign, e.to_string())),
        }
    }

    /// Copy files into the repository directory
    ///
    /// On failure, files copied by this call that were not published before
    /// are removed again.
    fn publish(&self, files: &[PathBuf], previous: &BTreeSet<String>) -> Result<BTreeSet<String>, FailureReason> {
        let repository = self.paths.repository();
        let mut published = BTreeSet::new();
        for file in files {
            let Some(name) = file.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if let Err(e) = filesystem::atomic_copy(file, &repository.join(name)) {
                self.unpublish(published.difference(previous));
                return Err(FailureReason::new(
                    FailureKind::Storage,
                    format!("failed to publish {name}: {e}"),
                ));
            }
            published.insert(name.to_string());
        }
        Ok(published)
    }

    fn unpublish<'a>(&self, names: impl Iterator<Item = &'a String>) {
        let repository = self.paths.repository();
        for name in names {
            remove_published(&repository, name);
        }
    }
}

fn remove_published(repository: &Path, name: &str) {
    if let Err(e) = filesystem::remove_file(&repository.join(name)) {
        tracing::warn!("Failed to remove {}: {}", name, e);
    }
}

fn build_failure(error: BuildError) -> FailureReason {
    match error {
        BuildError::Cancelled { .. } => FailureReason::new(FailureKind::Cancelled, error.to_string()),
        _ => FailureReason::new(FailureKind::Build, error.to_string()),
    }
}
