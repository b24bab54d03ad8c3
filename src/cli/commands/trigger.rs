//! CLI implementation for `repokeeper trigger` command
//!
//! Reruns every configured trigger against the current repository state,
//! treating every base as changed.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;

use crate::cli::output::{self, OutputConfig};

/// Execute the trigger command
pub async fn execute(config_path: &Path, output: OutputConfig) -> Result<()> {
    let application = super::open_application(config_path)?;
    let changed: BTreeSet<String> = application.store().snapshot().bases().map(str::to_string).collect();

    let report = application.run_triggers(&changed).await?;
    if output.json {
        output.print_json(&report)?;
    } else {
        output::print_pipeline_report(&report, output);
    }

    let failed: Vec<&str> = report.failed().collect();
    if !failed.is_empty() {
        anyhow::bail!("Trigger(s) failed: {}", failed.join(", "));
    }
    Ok(())
}
