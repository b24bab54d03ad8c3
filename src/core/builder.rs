//! Build execution seam
//!
//! The scheduler hands each base to a [`BuildRunner`] once its build root is
//! prepared. The runner drives the external build tool inside that root and
//! reports how it exited; finding and publishing artifacts stays with the
//! scheduler.

use std::future::Future;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::core::package::Package;
use crate::error::BuildError;

/// One build to execute
#[derive(Debug, Clone)]
pub struct BuildJob {
    /// Package being built
    pub package: Package,
    /// Isolated working directory, removed after the build
    pub build_root: PathBuf,
    /// File receiving the build output
    pub log_path: PathBuf,
    /// Repository architecture
    pub architecture: String,
}

/// How the build tool finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Process exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
}

impl BuildOutcome {
    /// Successful exit
    pub fn success() -> Self {
        Self { exit_code: Some(0) }
    }

    /// Exit with a code
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
        }
    }

    /// Check if the tool exited with 0
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Drives one external build process
pub trait BuildRunner: Send + Sync + 'static {
    /// Run the build tool for `job` until it exits or `cancel` fires
    ///
    /// On cancellation the process must be terminated before returning.
    fn run(
        &self,
        job: &BuildJob,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<BuildOutcome, BuildError>> + Send;
}
