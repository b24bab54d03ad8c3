//! CLI command for displaying the build order
//!
//! Implements the `repokeeper tree` command.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::output::{status, OutputConfig};
use crate::core::config::Configuration;
use crate::core::metadata::Metadata;
use crate::core::resolver::{DependencyResolver, Resolution, Selection};

/// One base in build order
#[derive(Debug, Serialize)]
struct TreeEntry {
    base: String,
    version: String,
    dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unresolved: Vec<String>,
}

/// Machine-readable resolution result
#[derive(Debug, Serialize)]
struct TreeView {
    order: Vec<TreeEntry>,
    cycles: Vec<Vec<String>>,
    failures: BTreeMap<String, String>,
    blocked: BTreeMap<String, BTreeSet<String>>,
    unknown: BTreeSet<String>,
}

impl TreeView {
    fn new(resolution: &Resolution) -> Self {
        let order = resolution
            .order
            .iter()
            .map(|base| TreeEntry {
                base: base.clone(),
                version: resolution.packages[base].version.to_string(),
                dependencies: resolution.graph.dependencies(base).map(str::to_string).collect(),
                unresolved: resolution
                    .unresolved
                    .get(base)
                    .map(|names| names.iter().cloned().collect())
                    .unwrap_or_default(),
            })
            .collect();
        Self {
            order,
            cycles: resolution.cycles(),
            failures: resolution
                .failures
                .iter()
                .map(|(base, error)| (base.clone(), error.to_string()))
                .collect(),
            blocked: resolution.blocked.clone(),
            unknown: resolution.unknown.clone(),
        }
    }

    fn print(&self) {
        for (index, entry) in self.order.iter().enumerate() {
            let mut line = format!("{:>3}. {} {}", index + 1, entry.base, entry.version);
            if !entry.dependencies.is_empty() {
                line.push_str(&format!(" <- {}", entry.dependencies.join(", ")));
            }
            println!("{line}");
            if !entry.unresolved.is_empty() {
                println!(
                    "     {} unresolved: {}",
                    status::WARNING,
                    entry.unresolved.join(", ")
                );
            }
        }
        for cycle in &self.cycles {
            println!("{} cycle: {}", status::ERROR, cycle.join(" <-> "));
        }
        for (base, error) in &self.failures {
            if !self.cycles.iter().any(|cycle| cycle.contains(base)) {
                println!("{} {}: {}", status::ERROR, base, error);
            }
        }
        for (base, blockers) in &self.blocked {
            let blockers: Vec<&str> = blockers.iter().map(String::as_str).collect();
            println!("{} {}: blocked by {}", status::ERROR, base, blockers.join(", "));
        }
        for name in &self.unknown {
            println!("{} {}: no package provides this name", status::ERROR, name);
        }
    }
}

/// Execute the tree command
pub fn execute(config_path: &Path, bases: Vec<String>, output: OutputConfig) -> Result<()> {
    let config = Configuration::load_from_path(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let metadata = Metadata::load_from_path(&config.metadata_path())
        .with_context(|| format!("Failed to load {}", config.metadata_path().display()))?;

    let selection = if bases.is_empty() {
        Selection::All
    } else {
        Selection::bases(bases)
    };
    let resolution = DependencyResolver::new(&metadata).resolve(&selection);
    let view = TreeView::new(&resolution);

    if output.json {
        output.print_json(&view)?;
    } else if !output.quiet {
        view.print();
    }

    if !resolution.is_complete() {
        anyhow::bail!("Dependency problems found");
    }
    Ok(())
}
