//! CLI implementation for `repokeeper status` command

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::output::{self, OutputConfig};
use crate::core::config::Configuration;
use crate::core::store::RepositoryStore;

/// Execute the status command
///
/// Reads the state directory without opening the store, so it is safe to
/// run next to an update cycle.
pub fn execute(config_path: &Path, base: Option<&str>, output: OutputConfig) -> Result<()> {
    let config = Configuration::load_from_path(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let snapshot =
        RepositoryStore::read_snapshot(&config.paths().state()).context("Failed to read state")?;

    let views = match base {
        Some(base) => vec![snapshot
            .status_view(base)
            .with_context(|| format!("Package '{base}' is not in the repository"))?],
        None => snapshot.status_views(),
    };

    if output.json {
        output.print_json(&views)?;
    } else if !output.quiet {
        output::print_status_table(&views);
    }
    Ok(())
}
