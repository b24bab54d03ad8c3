//! Operator operations
//!
//! An [`Application`] owns the loaded metadata, the state store, the build
//! scheduler and the trigger pipeline, and turns each [`Operation`] into an
//! update cycle scoped to the requested bases.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::builder::BuildRunner;
use crate::core::config::Configuration;
use crate::core::lock::BuildLocks;
use crate::core::metadata::Metadata;
use crate::core::resolver::{DependencyResolver, Resolution, Selection};
use crate::core::scheduler::{BuildScheduler, CycleReport};
use crate::core::status::BuildStatusKind;
use crate::core::store::{RepositoryStore, StatusView};
use crate::core::trigger::{PipelineReport, TriggerContext, TriggerPipeline, TriggerRegistry};
use crate::error::{BuildError, RepokeeperError, StoreError};
use crate::infra::dirs::RepositoryPaths;
use crate::infra::filesystem;
use crate::infra::runner::CommandBuildRunner;
use crate::infra::sign::{ArtifactSigner, GpgSigner};

/// Operator request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Build and publish new bases
    Add(Vec<String>),
    /// Delete bases and their artifacts
    Remove(Vec<String>),
    /// Rebuild bases already in the repository
    Rebuild(Vec<String>),
    /// Rebuild outdated or unsuccessful bases
    UpdateAll,
}

/// Result of one operation
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationReport {
    /// Build cycle results
    pub cycle: CycleReport,
    /// Bases removed from the repository
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub removed: BTreeSet<String>,
    /// Trigger results, absent when the pipeline did not run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineReport>,
}

impl OperationReport {
    /// Check if every requested base succeeded
    pub fn is_success(&self) -> bool {
        self.cycle.is_success()
    }

    /// Bases whose state changed
    pub fn changed_bases(&self) -> BTreeSet<String> {
        let mut changed = self.cycle.changed_bases();
        changed.extend(self.removed.iter().cloned());
        changed
    }
}

/// Repository manager
pub struct Application<R: BuildRunner> {
    config: Configuration,
    paths: RepositoryPaths,
    metadata: Metadata,
    store: Arc<RepositoryStore>,
    scheduler: Arc<BuildScheduler<R>>,
    pipeline: TriggerPipeline,
}

impl Application<CommandBuildRunner> {
    /// Open the repository described by `config` with the configured build tool
    pub fn open(config: Configuration) -> Result<Self, RepokeeperError> {
        let runner = CommandBuildRunner::from_settings(&config.build).map_err(BuildError::from)?;
        let metadata = Metadata::load_from_path(&config.metadata_path())?;
        Self::with_runner(config, metadata, runner, &TriggerRegistry::with_builtins())
    }
}

impl<R: BuildRunner> Application<R> {
    /// Open the repository with an explicit runner and trigger registry
    pub fn with_runner(
        config: Configuration,
        metadata: Metadata,
        runner: R,
        registry: &TriggerRegistry,
    ) -> Result<Self, RepokeeperError> {
        let paths = config.paths();
        paths.ensure()?;

        let locks = BuildLocks::new(paths.locks());
        let store = Arc::new(RepositoryStore::open_with(&paths.state(), |base| {
            matches!(locks.try_acquire(base), Ok(None))
        })?);
        let signer = GpgSigner::from_settings(&config.sign)?
            .map(|signer| Arc::new(signer) as Arc<dyn ArtifactSigner>);
        let scheduler = BuildScheduler::new(
            runner,
            Arc::clone(&store),
            locks,
            paths.clone(),
        )
        .with_max_concurrency(config.build.max_concurrency)
        .with_lock_policy(config.build.lock_policy)
        .with_signer(signer)
        .with_patches(config.build.patches.clone());
        let pipeline = TriggerPipeline::from_settings(
            registry,
            &config.triggers,
            &TriggerContext::from_config(&config),
        )?;

        tracing::debug!(
            "Opened repository {} at {} ({} bases, {} triggers)",
            config.repository.name,
            paths.root().display(),
            store.len(),
            pipeline.len()
        );

        Ok(Self {
            config,
            paths,
            metadata,
            store,
            scheduler: Arc::new(scheduler),
            pipeline,
        })
    }

    /// Loaded configuration
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Repository layout
    pub fn paths(&self) -> &RepositoryPaths {
        &self.paths
    }

    /// Loaded metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// State store
    pub fn store(&self) -> &RepositoryStore {
        &self.store
    }

    /// Build runner
    pub fn runner(&self) -> &R {
        self.scheduler.runner()
    }

    /// Resolve a selection against the loaded metadata
    pub fn resolve(&self, selection: &Selection) -> Resolution {
        DependencyResolver::new(&self.metadata).resolve(selection)
    }

    /// Status of one base, or of every base
    pub fn status(&self, base: Option<&str>) -> Result<Vec<StatusView>, RepokeeperError> {
        let snapshot = self.store.snapshot();
        match base {
            Some(base) => {
                let view = snapshot.status_view(base).ok_or_else(|| StoreError::NotFound {
                    base: base.to_string(),
                })?;
                Ok(vec![view])
            }
            None => Ok(snapshot.status_views()),
        }
    }

    /// Carry out an operation
    pub async fn execute(
        &self,
        operation: Operation,
        cancel: &CancellationToken,
    ) -> Result<OperationReport, RepokeeperError> {
        self.store.refresh()?;
        match operation {
            Operation::Add(names) => {
                tracing::info!("Adding {}", names.join(", "));
                self.cycle(Selection::bases(names), cancel).await
            }
            Operation::Rebuild(names) => {
                let bases = self.managed_bases(&names)?;
                tracing::info!("Rebuilding {}", names.join(", "));
                self.cycle(Selection::Bases(bases), cancel).await
            }
            Operation::UpdateAll => {
                let bases = self.outdated_bases();
                if bases.is_empty() {
                    tracing::info!("Repository is up to date");
                    return Ok(OperationReport::default());
                }
                tracing::info!("Updating {}", bases.iter().cloned().collect::<Vec<_>>().join(", "));
                self.cycle(Selection::Bases(bases), cancel).await
            }
            Operation::Remove(names) => self.remove(&names).await,
        }
    }

    /// Rerun the trigger pipeline on the current snapshot
    ///
    /// The store is reloaded first so records committed by other processes
    /// are part of the snapshot.
    pub async fn run_triggers(&self, changed: &BTreeSet<String>) -> Result<PipelineReport, RepokeeperError> {
        self.store.refresh()?;
        Ok(self.pipeline.run(&self.store.snapshot(), changed).await)
    }

    async fn cycle(
        &self,
        selection: Selection,
        cancel: &CancellationToken,
    ) -> Result<OperationReport, RepokeeperError> {
        let resolution = self.resolve(&selection);
        for name in &resolution.unknown {
            tracing::error!("No package provides '{}'", name);
        }

        let cycle = self.scheduler.run(&resolution, cancel).await;
        self.store.flush()?;

        let mut report = OperationReport {
            cycle,
            ..OperationReport::default()
        };
        if cancel.is_cancelled() {
            tracing::warn!("Cycle cancelled, triggers not run");
            return Ok(report);
        }
        report.pipeline = Some(self.run_triggers(&report.changed_bases()).await?);
        Ok(report)
    }

    /// Store records named by base or sub-package
    fn managed_bases(&self, names: &[String]) -> Result<BTreeSet<String>, RepokeeperError> {
        let resolver = DependencyResolver::new(&self.metadata);
        let mut bases = BTreeSet::new();
        for name in names {
            let base = match self.store.get(name) {
                Some(_) => name.clone(),
                None => resolver
                    .provider(name)
                    .filter(|base| self.store.get(base).is_some())
                    .map(str::to_string)
                    .ok_or_else(|| StoreError::NotFound { base: name.clone() })?,
            };
            bases.insert(base);
        }
        Ok(bases)
    }

    /// Bases whose metadata is newer or whose last build did not succeed
    fn outdated_bases(&self) -> BTreeSet<String> {
        let snapshot = self.store.snapshot();
        let mut bases = BTreeSet::new();
        for (base, record) in snapshot.iter() {
            let Some(current) = self.metadata.get(base) else {
                tracing::warn!("'{}' is no longer in the metadata, skipping", base);
                continue;
            };
            if record.package.is_outdated(current) || record.status.status != BuildStatusKind::Success {
                bases.insert(base.to_string());
            }
        }
        bases
    }

    async fn remove(&self, names: &[String]) -> Result<OperationReport, RepokeeperError> {
        for name in names {
            if self.store.get(name).is_none() {
                return Err(StoreError::NotFound { base: name.clone() }.into());
            }
        }

        let repository = self.paths.repository();
        let mut report = OperationReport::default();
        for name in names {
            let record = self.store.remove(name)?;
            for file in &record.artifacts {
                if let Err(e) = filesystem::remove_file(&repository.join(file)) {
                    tracing::warn!("Failed to remove {}: {}", file, e);
                }
            }
            tracing::info!("Removed {} {}", name, record.package.version);
            report.removed.insert(name.clone());
        }

        report.pipeline = Some(self.run_triggers(&report.changed_bases()).await?);
        Ok(report)
    }
}
