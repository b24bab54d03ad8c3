//! CLI implementation for `repokeeper rebuild` command

use std::path::Path;

use anyhow::Result;

use crate::cli::output::OutputConfig;
use crate::core::application::Operation;

/// Execute the rebuild command
pub async fn execute(config_path: &Path, bases: Vec<String>, output: OutputConfig) -> Result<()> {
    let message = format!("Rebuilding {}", bases.join(", "));
    super::run_operation(config_path, Operation::Rebuild(bases), &message, output).await
}
