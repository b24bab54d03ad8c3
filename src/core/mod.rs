//! Core business logic module
//!
//! Repository domain logic: package metadata, dependency resolution, build
//! scheduling, the state store and the trigger pipeline. Process, network
//! and filesystem helpers live in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`version`] - Package versions and `vercmp` ordering
//! - [`package`] - Package descriptors and artifact naming
//! - [`metadata`] - Metadata input file
//! - [`resolver`] - Dependency graph and build order
//! - [`status`] - Build status and failure reasons
//! - [`store`] - Persistent per-base repository state
//! - [`lock`] - Per-base build locks
//! - [`builder`] - Build runner seam
//! - [`patch`] - Operator-defined PKGBUILD patches
//! - [`scheduler`] - Update cycle execution
//! - [`trigger`] - Post-cycle trigger pipeline
//! - [`config`] - Repository configuration
//! - [`application`] - Operator operations

pub mod application;
pub mod builder;
pub mod config;
pub mod lock;
pub mod metadata;
pub mod package;
pub mod patch;
pub mod resolver;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod trigger;
pub mod version;
