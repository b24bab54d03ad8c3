//! CLI implementation for `repokeeper update` command

use std::path::Path;

use anyhow::Result;

use crate::cli::output::OutputConfig;
use crate::core::application::Operation;

/// Execute the update command
pub async fn execute(config_path: &Path, output: OutputConfig) -> Result<()> {
    super::run_operation(config_path, Operation::UpdateAll, "Updating repository", output).await
}
