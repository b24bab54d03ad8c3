//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod add;
pub mod rebuild;
pub mod remove;
pub mod status;
pub mod tree;
pub mod trigger;
pub mod update;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

use crate::cli::output::{self, OutputConfig};
use crate::core::application::{Application, Operation};
use crate::core::config::Configuration;
use crate::infra::runner::CommandBuildRunner;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and add packages to the repository
    Add {
        /// Package bases or sub-package names
        #[arg(required = true)]
        bases: Vec<String>,
    },

    /// Remove packages and their artifacts from the repository
    Remove {
        /// Package bases
        #[arg(required = true)]
        bases: Vec<String>,
    },

    /// Rebuild packages already in the repository
    Rebuild {
        /// Package bases or sub-package names
        #[arg(required = true)]
        bases: Vec<String>,
    },

    /// Rebuild outdated and failed packages
    Update,

    /// Show package build status
    Status {
        /// Show a single base
        base: Option<String>,
    },

    /// Display build order and dependency problems
    Tree {
        /// Resolve only these bases (all known bases if empty)
        bases: Vec<String>,
    },

    /// Run the trigger pipeline on the current repository state
    Trigger,
}

impl Commands {
    /// Execute the command
    pub async fn run(self, config_path: &Path, output: OutputConfig) -> Result<()> {
        match self {
            Self::Add { bases } => add::execute(config_path, bases, output).await,
            Self::Remove { bases } => remove::execute(config_path, bases, output).await,
            Self::Rebuild { bases } => rebuild::execute(config_path, bases, output).await,
            Self::Update => update::execute(config_path, output).await,
            Self::Status { base } => status::execute(config_path, base.as_deref(), output),
            Self::Tree { bases } => tree::execute(config_path, bases, output),
            Self::Trigger => trigger::execute(config_path, output).await,
        }
    }
}

/// Load the configuration and open the repository
pub(crate) fn open_application(config_path: &Path) -> Result<Application<CommandBuildRunner>> {
    let config = Configuration::load_from_path(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    Application::open(config).context("Failed to open repository")
}

/// Cancellation token fired by Ctrl-C
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling running builds");
            trigger.cancel();
        }
    });
    cancel
}

/// Run an operation and print its report
///
/// Fails when any requested base failed.
pub(crate) async fn run_operation(
    config_path: &Path,
    operation: Operation,
    message: &str,
    output: OutputConfig,
) -> Result<()> {
    let application = open_application(config_path)?;
    let cancel = cancel_on_ctrl_c();

    let spinner = output.show_progress().then(|| output::create_spinner(message));
    let result = application.execute(operation, &cancel).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let report = result?;

    if output.json {
        output.print_json(&report)?;
    } else {
        output::print_operation_report(&report, output);
    }

    let failed = report.cycle.failed().count() + report.cycle.unknown.len();
    if failed > 0 {
        anyhow::bail!("{failed} package(s) failed");
    }
    if cancel.is_cancelled() {
        anyhow::bail!("Cancelled");
    }
    Ok(())
}
