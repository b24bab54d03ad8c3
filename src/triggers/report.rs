//! Status report triggers
//!
//! Render the repository status read contract to a file or the log. File
//! reports are only rewritten when their rendered content changes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::PathBuf;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::core::config::TriggerSettings;
use crate::core::status::BuildStatusKind;
use crate::core::store::{RepositorySnapshot, StatusView};
use crate::core::trigger::{decode_settings, Trigger, TriggerContext};
use crate::error::TriggerError;
use crate::infra::filesystem;

/// Repository status as published by reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    /// Repository name
    pub repository: String,
    /// Repository architecture
    pub architecture: String,
    /// Number of bases per status
    pub summary: BTreeMap<BuildStatusKind, usize>,
    /// Per-base status
    pub packages: Vec<StatusView>,
}

impl StatusDocument {
    /// Build the document for a snapshot
    pub fn new(context: &TriggerContext, snapshot: &RepositorySnapshot) -> Self {
        Self {
            repository: context.repository.clone(),
            architecture: context.paths.architecture().to_string(),
            summary: snapshot.counts(),
            packages: snapshot.status_views(),
        }
    }

    /// Pretty JSON rendering
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self).map(|mut json| {
            json.push('\n');
            json
        })
    }
}

#[derive(Debug, Deserialize)]
struct FileSettings {
    path: PathBuf,
}

fn write_report(name: &str, path: &PathBuf, content: &str) -> Result<(), TriggerError> {
    let changed = filesystem::write_if_changed(path, content.as_bytes()).map_err(|e| TriggerError::Io {
        path: path.clone(),
        error: e.to_string(),
    })?;
    if changed {
        tracing::info!("Trigger {} wrote {}", name, path.display());
    } else {
        tracing::debug!("Trigger {}: {} unchanged", name, path.display());
    }
    Ok(())
}

/// Writes the status document as JSON
#[derive(Debug, Clone)]
pub struct JsonReportTrigger {
    name: String,
    path: PathBuf,
    context: TriggerContext,
}

impl JsonReportTrigger {
    /// Create a JSON report at `path`
    pub fn new(name: impl Into<String>, path: PathBuf, context: TriggerContext) -> Self {
        Self {
            name: name.into(),
            path,
            context,
        }
    }
}

impl Trigger for JsonReportTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        snapshot: &'a RepositorySnapshot,
        _changed: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        Box::pin(async move {
            let json = StatusDocument::new(&self.context, snapshot)
                .to_json()
                .map_err(|e| TriggerError::Failed {
                    name: self.name.clone(),
                    error: e.to_string(),
                })?;
            write_report(&self.name, &self.path, &json)
        })
    }
}

/// Factory for `type = "json"`
pub fn json_factory(
    settings: &TriggerSettings,
    context: &TriggerContext,
) -> Result<Box<dyn Trigger>, TriggerError> {
    let decoded: FileSettings = decode_settings(settings)?;
    Ok(Box::new(JsonReportTrigger::new(&settings.name, decoded.path, context.clone())))
}

/// Writes a static HTML package listing
#[derive(Debug, Clone)]
pub struct HtmlReportTrigger {
    name: String,
    path: PathBuf,
    context: TriggerContext,
}

impl HtmlReportTrigger {
    /// Create an HTML report at `path`
    pub fn new(name: impl Into<String>, path: PathBuf, context: TriggerContext) -> Self {
        Self {
            name: name.into(),
            path,
            context,
        }
    }

    /// Render the listing
    pub fn render(&self, snapshot: &RepositorySnapshot) -> String {
        let title = format!(
            "{} ({})",
            escape(&self.context.repository),
            escape(self.context.paths.architecture())
        );
        let mut html = String::new();
        let _ = writeln!(html, "<!DOCTYPE html>");
        let _ = writeln!(html, "<html>\n<head>\n<meta charset=\"utf-8\">");
        let _ = writeln!(html, "<title>{title}</title>\n</head>\n<body>");
        let _ = writeln!(html, "<h1>{title}</h1>");

        let summary: Vec<String> = snapshot
            .counts()
            .iter()
            .map(|(status, count)| format!("{status}: {count}"))
            .collect();
        let _ = writeln!(html, "<p>{}</p>", escape(&summary.join(", ")));

        let _ = writeln!(html, "<table>");
        let _ = writeln!(
            html,
            "<tr><th>Base</th><th>Version</th><th>Status</th><th>Built</th><th>Files</th></tr>"
        );
        for (base, record) in snapshot.iter() {
            let files: Vec<String> = record
                .artifacts
                .iter()
                .filter(|file| !file.ends_with(".sig"))
                .map(|file| format!("<a href=\"{0}\">{0}</a>", escape(file)))
                .collect();
            let status = match &record.status.reason {
                Some(reason) => format!(
                    "<span title=\"{}\">{}</span>",
                    escape(&reason.to_string()),
                    record.status.status
                ),
                None => record.status.status.to_string(),
            };
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(base),
                escape(&record.package.version.to_string()),
                status,
                record.status.timestamp,
                files.join(" ")
            );
        }
        let _ = writeln!(html, "</table>\n</body>\n</html>");
        html
    }
}

impl Trigger for HtmlReportTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        snapshot: &'a RepositorySnapshot,
        _changed: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        Box::pin(async move { write_report(&self.name, &self.path, &self.render(snapshot)) })
    }
}

/// Factory for `type = "html"`
pub fn html_factory(
    settings: &TriggerSettings,
    context: &TriggerContext,
) -> Result<Box<dyn Trigger>, TriggerError> {
    let decoded: FileSettings = decode_settings(settings)?;
    Ok(Box::new(HtmlReportTrigger::new(&settings.name, decoded.path, context.clone())))
}

pub(crate) fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Logs a summary of the changed bases
#[derive(Debug, Clone)]
pub struct ConsoleTrigger {
    name: String,
}

impl ConsoleTrigger {
    /// Create a console trigger
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Trigger for ConsoleTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        snapshot: &'a RepositorySnapshot,
        changed: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        Box::pin(async move {
            for base in changed {
                match snapshot.get(base) {
                    Some(record) => match &record.status.reason {
                        Some(reason) => tracing::info!("{} {}: {} ({})", base, record.package.version, record.status.status, reason),
                        None => tracing::info!("{} {}: {}", base, record.package.version, record.status.status),
                    },
                    None => tracing::info!("{}: removed", base),
                }
            }
            let counts: Vec<String> = snapshot
                .counts()
                .iter()
                .map(|(status, count)| format!("{count} {status}"))
                .collect();
            tracing::info!(
                "Repository holds {} base(s): {}",
                snapshot.len(),
                counts.join(", ")
            );
            Ok(())
        })
    }
}

/// Factory for `type = "console"`
pub fn console_factory(
    settings: &TriggerSettings,
    _context: &TriggerContext,
) -> Result<Box<dyn Trigger>, TriggerError> {
    Ok(Box::new(ConsoleTrigger::new(&settings.name)))
}
