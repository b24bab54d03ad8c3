//! CLI implementation for `repokeeper remove` command
//!
//! Removes bases from the state store, deletes their published artifacts and
//! runs the trigger pipeline.

use std::path::Path;

use anyhow::Result;

use crate::cli::output::OutputConfig;
use crate::core::application::Operation;

/// Execute the remove command
pub async fn execute(config_path: &Path, bases: Vec<String>, output: OutputConfig) -> Result<()> {
    let message = format!("Removing {}", bases.join(", "));
    super::run_operation(config_path, Operation::Remove(bases), &message, output).await
}
