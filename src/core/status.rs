//! Build status tracking
//!
//! Every base carries a [`BuildStatus`]: the tagged state, when it was set,
//! the reference to the last build log and, for failures, why it failed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Build state of a package base
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatusKind {
    /// Never built
    #[default]
    Unknown,
    /// Scheduled in the current cycle
    Pending,
    /// Build process running
    Building,
    /// Build failed
    Failed,
    /// Built, verified and published
    Success,
}

impl BuildStatusKind {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Failed => "failed",
            Self::Success => "success",
        }
    }

    /// Check if this state ends a cycle for the base
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Success)
    }

    /// Check if moving from this state to `next` is allowed
    ///
    /// A base that is building may only finish; it never goes back to pending.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Building => next == Self::Building || next.is_terminal(),
            _ => true,
        }
    }
}

impl fmt::Display for BuildStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a base failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Dependency cycle or malformed metadata
    Resolution,
    /// Build tool exited unsuccessfully
    Build,
    /// Build tool succeeded but expected artifacts are missing
    ArtifactVerification,
    /// Artifact signing failed
    Sign,
    /// A dependency failed, no build attempted
    Dependency,
    /// State or artifact persistence failed
    Storage,
    /// Cycle was cancelled or the process died mid-build
    Cancelled,
}

impl FailureKind {
    /// Check if a build process was involved in this failure
    pub fn attempted_build(self) -> bool {
        matches!(self, Self::Build | Self::ArtifactVerification | Self::Sign)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolution => "resolution",
            Self::Build => "build",
            Self::ArtifactVerification => "artifact verification",
            Self::Sign => "sign",
            Self::Dependency => "dependency",
            Self::Storage => "storage",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Failure details attached to a failed status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Failure category
    pub kind: FailureKind,
    /// Human readable message
    pub message: String,
    /// Failed dependency for propagated failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_dependency: Option<String>,
}

impl FailureReason {
    /// Create a failure reason
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            failed_dependency: None,
        }
    }

    /// Failure propagated from a failed dependency
    pub fn dependency(dependency: &str) -> Self {
        Self {
            kind: FailureKind::Dependency,
            message: format!("dependency '{dependency}' failed"),
            failed_dependency: Some(dependency.to_string()),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Timestamped build status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    /// Current state
    pub status: BuildStatusKind,
    /// Unix timestamp of the last change
    pub timestamp: u64,
    /// Path of the last build log, relative to the repository root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_reference: Option<String>,
    /// Failure details when `status` is failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
}

impl BuildStatus {
    /// Status with the current timestamp
    pub fn new(status: BuildStatusKind) -> Self {
        Self {
            status,
            timestamp: unix_now(),
            log_reference: None,
            reason: None,
        }
    }

    /// Never built
    pub fn unknown() -> Self {
        Self::new(BuildStatusKind::Unknown)
    }

    /// Scheduled
    pub fn pending() -> Self {
        Self::new(BuildStatusKind::Pending)
    }

    /// Building right now
    pub fn building() -> Self {
        Self::new(BuildStatusKind::Building)
    }

    /// Built successfully
    pub fn success() -> Self {
        Self::new(BuildStatusKind::Success)
    }

    /// Failed with a reason
    pub fn failed(reason: FailureReason) -> Self {
        Self {
            reason: Some(reason),
            ..Self::new(BuildStatusKind::Failed)
        }
    }

    /// Attach a build log reference
    #[must_use]
    pub fn with_log(mut self, log_reference: Option<String>) -> Self {
        self.log_reference = log_reference;
        self
    }
}

impl Default for BuildStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} ({reason})", self.status),
            None => write!(f, "{}", self.status),
        }
    }
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
