//! Built-in trigger types
//!
//! - `directory`, `rsync`, `s3`: sync published artifacts to a destination
//! - `html`, `json`, `console`, `http`, `email`: report repository status
//! - `remote-push`: push build descriptions to a git remote

pub mod email;
pub mod http;
pub mod remote;
pub mod report;
pub mod sync;

use crate::core::trigger::TriggerRegistry;

pub use email::EmailReportTrigger;
pub use http::HttpReportTrigger;
pub use remote::RemotePushTrigger;
pub use report::{ConsoleTrigger, HtmlReportTrigger, JsonReportTrigger, StatusDocument};
pub use sync::{CommandSyncTrigger, DirectorySyncTrigger};

/// Register every built-in trigger type
pub fn register_builtins(registry: &mut TriggerRegistry) {
    registry.register("directory", sync::directory_factory);
    registry.register("rsync", sync::rsync_factory);
    registry.register("s3", sync::s3_factory);
    registry.register("html", report::html_factory);
    registry.register("json", report::json_factory);
    registry.register("console", report::console_factory);
    registry.register("http", http::http_factory);
    registry.register("email", email::email_factory);
    registry.register("remote-push", remote::remote_push_factory);
}
