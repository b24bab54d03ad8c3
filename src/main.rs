//! Repokeeper CLI - custom package repository manager
//!
//! Entry point for the repokeeper command-line application.

use anyhow::Result;
use clap::Parser;

use repokeeper::cli::output::display_error;
use repokeeper::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.output().init_tracing();

    // Run the command and handle errors
    match cli.run().await {
        Ok(()) => Ok(()),
        Err(e) => {
            display_error(&e);
            std::process::exit(1);
        }
    }
}
