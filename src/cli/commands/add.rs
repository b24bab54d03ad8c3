//! CLI implementation for `repokeeper add` command

use std::path::Path;

use anyhow::Result;

use crate::cli::output::OutputConfig;
use crate::core::application::Operation;

/// Execute the add command
pub async fn execute(config_path: &Path, bases: Vec<String>, output: OutputConfig) -> Result<()> {
    let message = format!("Building {}", bases.join(", "));
    super::run_operation(config_path, Operation::Add(bases), &message, output).await
}
