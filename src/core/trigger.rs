//! Post-cycle trigger pipeline
//!
//! Triggers are created by name from a [`TriggerRegistry`] of factories and
//! run in declared order against the end-of-cycle snapshot. A failing
//! trigger is logged and the pipeline moves on, unless the trigger is
//! marked `required`, in which case the remaining triggers are skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::config::{Configuration, TriggerSettings};
use crate::core::patch::PkgbuildPatch;
use crate::core::store::RepositorySnapshot;
use crate::error::TriggerError;
use crate::infra::dirs::RepositoryPaths;

/// Repository facts handed to trigger factories
#[derive(Debug, Clone)]
pub struct TriggerContext {
    /// Repository name
    pub repository: String,
    /// Repository layout
    pub paths: RepositoryPaths,
    /// PKGBUILD patches of the build settings
    pub patches: Vec<PkgbuildPatch>,
}

impl TriggerContext {
    /// Create a context
    pub fn new(repository: impl Into<String>, paths: RepositoryPaths) -> Self {
        Self {
            repository: repository.into(),
            paths,
            patches: Vec::new(),
        }
    }

    /// Context for a configuration
    pub fn from_config(config: &Configuration) -> Self {
        Self::new(config.repository.name.clone(), config.paths()).with_patches(config.build.patches.clone())
    }

    /// Set the PKGBUILD patches
    #[must_use]
    pub fn with_patches(mut self, patches: Vec<PkgbuildPatch>) -> Self {
        self.patches = patches;
        self
    }
}

/// A configured post-cycle action
pub trait Trigger: Send + Sync {
    /// Configured trigger name
    fn name(&self) -> &str;

    /// Act on the snapshot
    ///
    /// Running twice against an unchanged snapshot must leave the external
    /// state as the first run left it.
    fn run<'a>(
        &'a self,
        snapshot: &'a RepositorySnapshot,
        changed: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, Result<(), TriggerError>>;
}

/// Creates a trigger from its settings
pub type TriggerFactory =
    fn(&TriggerSettings, &TriggerContext) -> Result<Box<dyn Trigger>, TriggerError>;

/// Trigger factories by type name
#[derive(Default)]
pub struct TriggerRegistry {
    factories: BTreeMap<String, TriggerFactory>,
}

impl TriggerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every built-in trigger type
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::triggers::register_builtins(&mut registry);
        registry
    }

    /// Register a factory, replacing any previous one of the same type
    pub fn register(&mut self, kind: impl Into<String>, factory: TriggerFactory) {
        self.factories.insert(kind.into(), factory);
    }

    /// Registered type names
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Check if a type is registered
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Instantiate a configured trigger
    pub fn create(
        &self,
        settings: &TriggerSettings,
        context: &TriggerContext,
    ) -> Result<Box<dyn Trigger>, TriggerError> {
        let factory = self
            .factories
            .get(&settings.kind)
            .ok_or_else(|| TriggerError::UnknownType {
                kind: settings.kind.clone(),
            })?;
        factory(settings, context)
    }
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Decode the type-specific settings table of a trigger
pub fn decode_settings<T: DeserializeOwned>(settings: &TriggerSettings) -> Result<T, TriggerError> {
    toml::Value::Table(settings.settings.clone())
        .try_into()
        .map_err(|e: toml::de::Error| TriggerError::InvalidSettings {
            name: settings.name.clone(),
            error: e.to_string(),
        })
}

/// How one trigger ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "error", rename_all = "lowercase")]
pub enum TriggerOutcome {
    /// Ran to completion
    Succeeded,
    /// Ran and failed
    Failed(String),
    /// Not run because a required trigger failed
    Skipped,
}

/// Result of one pipeline run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    /// Outcome per trigger in run order
    pub outcomes: Vec<(String, TriggerOutcome)>,
}

impl PipelineReport {
    /// Check if every trigger succeeded
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, outcome)| *outcome == TriggerOutcome::Succeeded)
    }

    /// Names of failed triggers
    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, TriggerOutcome::Failed(_)))
            .map(|(name, _)| name.as_str())
    }
}

struct Stage {
    trigger: Box<dyn Trigger>,
    required: bool,
}

/// Ordered list of triggers
#[derive(Default)]
pub struct TriggerPipeline {
    stages: Vec<Stage>,
}

impl TriggerPipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the pipeline from configured triggers
    pub fn from_settings(
        registry: &TriggerRegistry,
        settings: &[TriggerSettings],
        context: &TriggerContext,
    ) -> Result<Self, TriggerError> {
        let mut pipeline = Self::new();
        for trigger in settings {
            pipeline.push(registry.create(trigger, context)?, trigger.required);
        }
        Ok(pipeline)
    }

    /// Append a trigger
    pub fn push(&mut self, trigger: Box<dyn Trigger>, required: bool) {
        self.stages.push(Stage { trigger, required });
    }

    /// Number of triggers
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Check if no trigger is configured
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every trigger in order
    pub async fn run(
        &self,
        snapshot: &RepositorySnapshot,
        changed: &BTreeSet<String>,
    ) -> PipelineReport {
        let mut report = PipelineReport::default();
        let mut aborted = false;

        for stage in &self.stages {
            let name = stage.trigger.name().to_string();
            if aborted {
                report.outcomes.push((name, TriggerOutcome::Skipped));
                continue;
            }

            tracing::debug!("Running trigger {}", name);
            match stage.trigger.run(snapshot, changed).await {
                Ok(()) => report.outcomes.push((name, TriggerOutcome::Succeeded)),
                Err(e) => {
                    if stage.required {
                        tracing::error!("Required trigger {} failed: {}", name, e);
                        aborted = true;
                    } else {
                        tracing::warn!("Trigger {} failed: {}", name, e);
                    }
                    report.outcomes.push((name, TriggerOutcome::Failed(e.to_string())));
                }
            }
        }
        report
    }
}

impl fmt::Debug for TriggerPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| stage.trigger.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::sync::Arc;

    struct Recording {
        name: String,
        fail: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Trigger for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        fn run<'a>(
            &'a self,
            _snapshot: &'a RepositorySnapshot,
            _changed: &'a BTreeSet<String>,
        ) -> BoxFuture<'a, Result<(), TriggerError>> {
            Box::pin(async move {
                self.calls.lock().push(self.name.clone());
                if self.fail {
                    Err(TriggerError::Failed {
                        name: self.name.clone(),
                        error: "boom".to_string(),
                    })
                } else {
                    Ok(())
                }
            })
        }
    }

    fn recording(name: &str, fail: bool, calls: &Arc<Mutex<Vec<String>>>) -> Box<dyn Trigger> {
        Box::new(Recording {
            name: name.to_string(),
            fail,
            calls: Arc::clone(calls),
        })
    }

    fn settings(name: &str, kind: &str, table: &str) -> TriggerSettings {
        TriggerSettings {
            name: name.to_string(),
            kind: kind.to_string(),
            required: false,
            settings: toml::from_str(table).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_soft_failure_continues() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = TriggerPipeline::new();
        pipeline.push(recording("a", true, &calls), false);
        pipeline.push(recording("b", false, &calls), false);

        let report = pipeline
            .run(&RepositorySnapshot::default(), &BTreeSet::new())
            .await;
        assert_eq!(*calls.lock(), vec!["a", "b"]);
        assert!(!report.is_success());
        assert_eq!(report.failed().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(report.outcomes[1].1, TriggerOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_required_failure_skips_rest() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = TriggerPipeline::new();
        pipeline.push(recording("a", true, &calls), true);
        pipeline.push(recording("b", false, &calls), false);

        let report = pipeline
            .run(&RepositorySnapshot::default(), &BTreeSet::new())
            .await;
        assert_eq!(*calls.lock(), vec!["a"]);
        assert_eq!(report.outcomes[1], ("b".to_string(), TriggerOutcome::Skipped));
    }

    #[test]
    fn test_registry_unknown_type() {
        let registry = TriggerRegistry::new();
        let context = TriggerContext::new("custom", RepositoryPaths::new("/tmp/r", "x86_64"));
        let result = registry.create(&settings("t", "nope", ""), &context);
        assert!(matches!(result, Err(TriggerError::UnknownType { kind }) if kind == "nope"));
    }

    #[test]
    fn test_registry_custom_factory() {
        fn factory(
            settings: &TriggerSettings,
            _context: &TriggerContext,
        ) -> Result<Box<dyn Trigger>, TriggerError> {
            Ok(Box::new(Recording {
                name: settings.name.clone(),
                fail: false,
                calls: Arc::new(Mutex::new(Vec::new())),
            }))
        }

        let mut registry = TriggerRegistry::new();
        registry.register("custom", factory);
        let context = TriggerContext::new("custom", RepositoryPaths::new("/tmp/r", "x86_64"));
        let trigger = registry.create(&settings("mine", "custom", ""), &context).unwrap();
        assert_eq!(trigger.name(), "mine");
    }

    #[test]
    fn test_builtins_registered() {
        let registry = TriggerRegistry::with_builtins();
        for kind in ["console", "directory", "email", "html", "http", "json", "remote-push", "rsync", "s3"] {
            assert!(registry.contains(kind), "missing {kind}");
        }
    }

    #[test]
    fn test_decode_settings() {
        #[derive(Deserialize)]
        struct Target {
            path: String,
            #[serde(default)]
            prune: bool,
        }

        let target: Target = decode_settings(&settings("t", "x", "path = \"/srv\"")).unwrap();
        assert_eq!(target.path, "/srv");
        assert!(!target.prune);

        let result = decode_settings::<Target>(&settings("t", "x", "prune = true"));
        assert!(matches!(result, Err(TriggerError::InvalidSettings { .. })));
    }
}
