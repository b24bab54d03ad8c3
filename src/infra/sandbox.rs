//! Build isolation using Docker/Podman containers
//!
//! When enabled, the build command is wrapped in a `run --rm` invocation of
//! the detected container runtime with the build root mounted at `/build`.
//! Containers are named after the build root so a cancelled build can be
//! killed through the runtime.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::config::SandboxSettings;

/// Sandbox-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    /// Container runtime not found
    #[error("Neither Docker nor Podman found in PATH")]
    RuntimeNotFound,

    /// Invalid configuration
    #[error("Invalid sandbox configuration: {message}")]
    InvalidConfig { message: String },
}

/// Container runtime type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    /// Docker container runtime
    Docker,
    /// Podman container runtime
    Podman,
}

impl ContainerRuntime {
    /// Get the command name for this runtime
    pub fn command(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }

    /// Detect an installed runtime, preferring Docker
    pub fn detect() -> Option<Self> {
        [Self::Docker, Self::Podman]
            .into_iter()
            .find(|runtime| which::which(runtime.command()).is_ok())
    }
}

/// Mount point of the build root inside the container
const CONTAINER_WORKDIR: &str = "/build";

/// A resolved build command
#[derive(Debug, Clone, PartialEq)]
pub struct WrappedCommand {
    /// Program to execute
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Container name when the command runs in a sandbox
    pub container: Option<String>,
}

/// Container name for a build root, restricted to `[a-zA-Z0-9_.-]`
pub fn container_name(build_root: &Path) -> String {
    let root = build_root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sanitized: String = root
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("repokeeper-{sanitized}")
}

/// Container wrapper for build commands
#[derive(Debug, Clone)]
pub struct Sandbox {
    runtime: ContainerRuntime,
    image: String,
    network: bool,
}

impl Sandbox {
    /// Create a sandbox from settings
    ///
    /// Returns `Ok(None)` when isolation is disabled.
    pub fn from_settings(settings: &SandboxSettings) -> Result<Option<Self>, SandboxError> {
        if !settings.enabled {
            return Ok(None);
        }
        if settings.image.trim().is_empty() {
            return Err(SandboxError::InvalidConfig {
                message: "sandbox image must not be empty".to_string(),
            });
        }
        let runtime = ContainerRuntime::detect().ok_or(SandboxError::RuntimeNotFound)?;
        Ok(Some(Self::with_runtime(runtime, settings)))
    }

    /// Create a sandbox for a known runtime
    pub fn with_runtime(runtime: ContainerRuntime, settings: &SandboxSettings) -> Self {
        Self {
            runtime,
            image: settings.image.clone(),
            network: settings.network,
        }
    }

    /// Runtime in use
    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    /// Wrap `program args` to run inside the container
    pub fn wrap(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
        build_root: &Path,
    ) -> WrappedCommand {
        let container = container_name(build_root);
        let mut wrapped = vec![
            "run".to_string(),
            "--rm".to_string(),
            format!("--name={container}"),
        ];

        if !self.network {
            wrapped.push("--network=none".to_string());
        }

        wrapped.push(format!(
            "-v={}:{}",
            build_root.display(),
            PathBuf::from(CONTAINER_WORKDIR).display()
        ));
        wrapped.push(format!("-w={CONTAINER_WORKDIR}"));

        for (key, value) in env {
            wrapped.push(format!("-e={key}={value}"));
        }

        wrapped.push(self.image.clone());
        wrapped.push(program.to_string());
        wrapped.extend(args.iter().cloned());

        WrappedCommand {
            program: self.runtime.command().to_string(),
            args: wrapped,
            container: Some(container),
        }
    }

    /// Command killing a running container
    pub fn kill_command(&self, container: &str) -> WrappedCommand {
        WrappedCommand {
            program: self.runtime.command().to_string(),
            args: vec!["kill".to_string(), container.to_string()],
            container: None,
        }
    }
}
