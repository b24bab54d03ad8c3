//! External build tool invocation
//!
//! Runs the configured build command in the build root with its output
//! captured to the build log. The build sees its package through
//! `REPOKEEPER_*` environment variables.
//!
//! Each build runs in its own process group so cancellation and time limits
//! reach everything the build tool spawned, not only the direct child.

use std::fs::{self, File};
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::core::builder::{BuildJob, BuildOutcome, BuildRunner};
use crate::core::config::BuildSettings;
use crate::error::BuildError;
use crate::infra::sandbox::{Sandbox, SandboxError, WrappedCommand};

/// Environment variable carrying the package base
pub const ENV_BASE: &str = "REPOKEEPER_BASE";
/// Environment variable carrying the full version
pub const ENV_VERSION: &str = "REPOKEEPER_VERSION";
/// Environment variable carrying the repository architecture
pub const ENV_ARCH: &str = "REPOKEEPER_ARCH";
/// Environment variable carrying the space-separated sub-package names
pub const ENV_PACKAGES: &str = "REPOKEEPER_PACKAGES";
/// Parallel make jobs, defaults to the number of CPUs unless configured
pub const ENV_MAKEFLAGS: &str = "MAKEFLAGS";

/// Runs the build tool as a child process
#[derive(Debug, Clone)]
pub struct CommandBuildRunner {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
    sandbox: Option<Sandbox>,
}

impl CommandBuildRunner {
    /// Create a runner for `command args`
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: Vec::new(),
            timeout: None,
            sandbox: None,
        }
    }

    /// Create a runner from build settings
    pub fn from_settings(settings: &BuildSettings) -> Result<Self, SandboxError> {
        let mut runner = Self::new(settings.command.clone(), settings.args.clone())
            .with_env(settings.env.clone())
            .with_timeout(settings.timeout_secs.map(Duration::from_secs));
        runner.sandbox = Sandbox::from_settings(&settings.sandbox)?;
        if let Some(sandbox) = &runner.sandbox {
            tracing::info!("Builds run inside {} containers", sandbox.runtime().command());
        }
        Ok(runner)
    }

    /// Add environment variables
    #[must_use]
    pub fn with_env<I>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(env);
        self
    }

    /// Set the per-build time limit
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn job_env(&self, job: &BuildJob) -> Vec<(String, String)> {
        let mut env = vec![
            (ENV_BASE.to_string(), job.package.base.clone()),
            (ENV_VERSION.to_string(), job.package.version.to_string()),
            (ENV_ARCH.to_string(), job.architecture.clone()),
            (ENV_PACKAGES.to_string(), job.package.sub_packages.join(" ")),
        ];
        if !self.env.iter().any(|(key, _)| key == ENV_MAKEFLAGS) {
            env.push((ENV_MAKEFLAGS.to_string(), format!("-j{}", num_cpus::get())));
        }
        env.extend(self.env.iter().cloned());
        env
    }

    fn command_for(&self, job: &BuildJob, env: &[(String, String)]) -> WrappedCommand {
        match &self.sandbox {
            Some(sandbox) => sandbox.wrap(&self.command, &self.args, env, &job.build_root),
            None => WrappedCommand {
                program: self.command.clone(),
                args: self.args.clone(),
                container: None,
            },
        }
    }

    /// Stop a running build with everything it spawned
    async fn terminate(&self, child: &mut Child, command: &WrappedCommand) {
        if let (Some(sandbox), Some(container)) = (&self.sandbox, &command.container) {
            let kill = sandbox.kill_command(container);
            let status = Command::new(&kill.program)
                .args(&kill.args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match status {
                Ok(status) if status.success() => {}
                Ok(status) => tracing::debug!("Killing container {} exited with {}", container, status),
                Err(e) => tracing::debug!("Failed to kill container {}: {}", container, e),
            }
        }
        kill_process_group(child);
        if let Err(e) = child.kill().await {
            tracing::debug!("Failed to kill build process: {}", e);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        tracing::debug!("Failed to kill process group {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

impl BuildRunner for CommandBuildRunner {
    async fn run(
        &self,
        job: &BuildJob,
        cancel: CancellationToken,
    ) -> Result<BuildOutcome, BuildError> {
        let base = job.package.base.clone();
        let log_error = |e: std::io::Error| BuildError::Io {
            path: job.log_path.clone(),
            error: e.to_string(),
        };

        if let Some(parent) = job.log_path.parent() {
            fs::create_dir_all(parent).map_err(log_error)?;
        }
        let mut log = File::create(&job.log_path).map_err(log_error)?;
        writeln!(
            log,
            "==> Building {} {} ({})",
            job.package.base, job.package.version, job.architecture
        )
        .map_err(log_error)?;
        let stderr_log = log.try_clone().map_err(log_error)?;

        let env = self.job_env(job);
        let command = self.command_for(job, &env);
        tracing::debug!("Running {} {}", command.program, command.args.join(" "));

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .envs(env)
            .current_dir(&job.build_root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr_log))
            .kill_on_drop(true);
        #[cfg(unix)]
        process.process_group(0);
        let mut child = process
            .spawn()
            .map_err(|e| BuildError::Spawn {
                base: base.clone(),
                error: format!("{}: {e}", command.program),
            })?;

        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| BuildError::Spawn {
                    base: base.clone(),
                    error: e.to_string(),
                })?;
                Ok(BuildOutcome { exit_code: status.code() })
            }
            () = cancel.cancelled() => {
                tracing::warn!("Terminating build of '{}'", base);
                self.terminate(&mut child, &command).await;
                Err(BuildError::Cancelled { base })
            }
            () = deadline => {
                tracing::warn!("Build of '{}' exceeded its time limit", base);
                self.terminate(&mut child, &command).await;
                Err(BuildError::Timeout {
                    base,
                    secs: timeout.map_or(0, |limit| limit.as_secs()),
                })
            }
        }
    }
}
