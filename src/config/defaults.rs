//! Default configuration values

/// Default repository name used in reports
pub const DEFAULT_REPOSITORY_NAME: &str = "custom";

/// Default repository architecture
pub const DEFAULT_ARCHITECTURE: &str = "x86_64";

/// Default repository root
pub const DEFAULT_ROOT: &str = "/var/lib/repokeeper";

/// Default external build tool
pub const DEFAULT_BUILD_COMMAND: &str = "makepkg";

/// Default arguments passed to the build tool
pub const DEFAULT_BUILD_ARGS: &[&str] = &["--noconfirm", "--cleanbuild", "--force"];

/// Default number of simultaneous builds
pub const DEFAULT_MAX_CONCURRENCY: usize = 2;

/// Default signing tool
pub const DEFAULT_SIGN_COMMAND: &str = "gpg";

/// Default container image for sandboxed builds
pub const DEFAULT_SANDBOX_IMAGE: &str = "archlinux:base-devel";

/// Metadata file name under the repository root
pub const METADATA_FILE: &str = "metadata.json";

/// Maximum number of HTTP report retry attempts
pub const MAX_REPORT_RETRIES: u32 = 3;

/// Poll interval while waiting for a lock held by another process (in milliseconds)
pub const LOCK_POLL_INTERVAL_MS: u64 = 500;
