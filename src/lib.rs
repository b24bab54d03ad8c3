//! Repokeeper - custom package repository manager
//!
//! Keeps a repository of locally built distribution packages up to date:
//! resolves build order from package metadata, builds bases in parallel with
//! an external build tool, records per-base state durably and runs
//! configured sync and report triggers after each cycle.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Resolution, scheduling, state and triggers
//! - [`infra`] - Infrastructure layer (filesystem, processes, sandbox)
//! - [`triggers`] - Built-in trigger types
//! - [`config`] - Configuration constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
pub mod triggers;

#[cfg(test)]
pub mod test_utils;
