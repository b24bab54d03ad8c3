//! Error types for repokeeper
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::config::ConfigError;
use crate::infra::sign::SignError;

/// Package-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PackageError {
    /// Version string cannot be parsed
    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    /// Base name cannot be used as a repository key
    #[error("Invalid package base name '{base}'")]
    InvalidBase { base: String },

    /// Parse error
    #[error("Failed to parse package metadata: {0}")]
    ParseError(String),
}

/// Dependency resolution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolverError {
    /// Circular dependency detected
    #[error("Dependency cycle between: {}", bases.join(", "))]
    DependencyCycle { bases: Vec<String> },

    /// Metadata is not usable for this base
    #[error("Malformed metadata for '{base}': {message}")]
    MalformedMetadata { base: String, message: String },
}

/// Repository state store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error on a record file
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// Record file exists but cannot be decoded
    #[error("Corrupted state record '{path}': {error}")]
    Corrupted { path: PathBuf, error: String },

    /// Record written by a newer schema
    #[error("State record '{path}' has unsupported schema version {version}")]
    UnsupportedSchema { path: PathBuf, version: u32 },

    /// Base name cannot be used as a record key
    #[error("Invalid package base name '{base}'")]
    InvalidBase { base: String },

    /// Package record keyed under another base
    #[error("Record for '{base}' carries package base '{package_base}'")]
    BaseMismatch { base: String, package_base: String },

    /// Status change not allowed
    #[error("Cannot move '{base}' from {from} to {to}")]
    InvalidTransition {
        base: String,
        from: String,
        to: String,
    },

    /// No record for base
    #[error("No record for '{base}'")]
    NotFound { base: String },
}

/// Build errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// Build process could not be started
    #[error("Failed to start build for '{base}': {error}")]
    Spawn { base: String, error: String },

    /// Build root preparation or log IO failed
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// Build exceeded its time limit
    #[error("Build for '{base}' timed out after {secs}s")]
    Timeout { base: String, secs: u64 },

    /// Base is being built elsewhere
    #[error("Package '{base}' is already being built")]
    Locked { base: String },

    /// Build was cancelled
    #[error("Build for '{base}' was cancelled")]
    Cancelled { base: String },

    /// Sandbox wrapper failed
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] crate::infra::sandbox::SandboxError),
}

/// Trigger errors
#[derive(Error, Debug)]
pub enum TriggerError {
    /// No factory registered under this type
    #[error("Unknown trigger type '{kind}'")]
    UnknownType { kind: String },

    /// Trigger settings could not be decoded
    #[error("Invalid settings for trigger '{name}': {error}")]
    InvalidSettings { name: String, error: String },

    /// Trigger ran and failed
    #[error("Trigger '{name}' failed: {error}")]
    Failed { name: String, error: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

/// Top-level repokeeper error type
#[derive(Error, Debug)]
pub enum RepokeeperError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Package error
    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    /// Resolver error
    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Build error
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Trigger error
    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    /// Signing setup error
    #[error("Signing error: {0}")]
    Sign(#[from] SignError),

    /// IO error
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
