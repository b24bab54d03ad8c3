//! Output formatting and progress indicators
//!
//! This module provides the spinner, status prefixes and report printing
//! shared by the commands.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::core::application::OperationReport;
use crate::core::status::BuildStatusKind;
use crate::core::store::StatusView;
use crate::core::trigger::{PipelineReport, TriggerOutcome};

/// Global output preferences from the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConfig {
    /// Only print errors
    pub quiet: bool,
    /// Print machine-readable JSON
    pub json: bool,
    /// Verbosity level
    pub verbose: u8,
}

impl OutputConfig {
    /// Create output preferences
    pub fn new(quiet: bool, json: bool, verbose: u8) -> Self {
        Self {
            quiet,
            json,
            verbose,
        }
    }

    /// Default log directive for these preferences
    pub fn log_directive(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Install the tracing subscriber
    ///
    /// `RUST_LOG` takes precedence over the verbosity flags.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_directive()));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// Check if progress indicators should be shown
    pub fn show_progress(&self) -> bool {
        !self.quiet && !self.json && self.verbose == 0
    }

    /// Print a value as pretty JSON
    pub fn print_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Create a spinner for operations with unknown duration
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.blue} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Print an error and its causes to stderr
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} {}", status::ERROR, error);
    for cause in error.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}

/// Print the result of an operation
pub fn print_operation_report(report: &OperationReport, output: OutputConfig) {
    if output.quiet {
        return;
    }

    for (base, outcome) in &report.cycle.outcomes {
        match outcome.status {
            BuildStatusKind::Success => {
                println!("{} {}", status::SUCCESS, base);
            }
            _ => {
                let reason = outcome
                    .reason
                    .as_ref()
                    .map_or_else(|| outcome.status.to_string(), ToString::to_string);
                println!("{} {}: {}", status::ERROR, base, reason);
                if let Some(log) = &outcome.log_reference {
                    println!("  log: {log}");
                }
            }
        }
    }
    for (base, names) in &report.cycle.warnings {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        println!(
            "{} {}: unresolved dependencies {}",
            status::WARNING,
            base,
            names.join(", ")
        );
    }
    for name in &report.cycle.unknown {
        println!("{} {}: no package provides this name", status::ERROR, name);
    }
    for base in &report.removed {
        println!("{} Removed {}", status::SUCCESS, base);
    }
    if let Some(pipeline) = &report.pipeline {
        print_pipeline_report(pipeline, output);
    }
}

/// Print trigger results
pub fn print_pipeline_report(report: &PipelineReport, output: OutputConfig) {
    if output.quiet {
        return;
    }
    for (name, outcome) in &report.outcomes {
        match outcome {
            TriggerOutcome::Succeeded => println!("{} trigger {}", status::SUCCESS, name),
            TriggerOutcome::Failed(error) => {
                println!("{} trigger {}: {}", status::ERROR, name, error);
            }
            TriggerOutcome::Skipped => println!("{} trigger {} skipped", status::INFO, name),
        }
    }
}

/// Print status views as a table
pub fn print_status_table(views: &[StatusView]) {
    if views.is_empty() {
        println!("{} Repository is empty", status::INFO);
        return;
    }
    println!("{:<28} {:<20} {:<9} DETAILS", "BASE", "VERSION", "STATUS");
    for view in views {
        let details = view
            .reason
            .as_deref()
            .or(view.log_reference.as_deref())
            .unwrap_or("");
        println!(
            "{:<28} {:<20} {:<9} {}",
            view.base, view.version, view.status, details
        );
    }
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}
