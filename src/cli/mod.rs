//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use commands::Commands;
use output::OutputConfig;

/// Repokeeper - custom package repository manager
///
/// Build, publish and sync a repository of locally built packages.
#[derive(Parser, Debug)]
#[command(name = "repokeeper")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file
    #[arg(short, long, global = true, env = "REPOKEEPER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Output preferences from the global flags
    pub fn output(&self) -> OutputConfig {
        OutputConfig::new(self.quiet, self.json, self.verbose)
    }

    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        let output = self.output();
        let config_path = self
            .config
            .clone()
            .unwrap_or_else(crate::infra::dirs::default_config_path);
        if let Some(cmd) = self.command {
            cmd.run(&config_path, output).await
        } else {
            // No subcommand provided, show help
            use clap::CommandFactory;
            let mut cmd = Self::command();
            cmd.print_help()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["repokeeper", "-vv", "--config", "/etc/rk.toml", "status"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/rk.toml")));
        assert!(matches!(cli.command, Some(Commands::Status { base: None })));
    }

    #[test]
    fn test_add_requires_base() {
        assert!(Cli::try_parse_from(["repokeeper", "add"]).is_err());
        let cli = Cli::parse_from(["repokeeper", "add", "foo", "bar", "--json"]);
        assert!(cli.json);
        match cli.command {
            Some(Commands::Add { bases }) => assert_eq!(bases, vec!["foo", "bar"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
