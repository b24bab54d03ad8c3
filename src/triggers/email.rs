//! Email report trigger
//!
//! Mails an HTML summary of the changed bases through SMTP, optionally with
//! the full package listing attached. Nothing is sent for a cycle that
//! changed nothing unless `no_empty_report = false`.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use futures::future::BoxFuture;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;

use crate::core::config::TriggerSettings;
use crate::core::store::RepositorySnapshot;
use crate::core::trigger::{decode_settings, Trigger, TriggerContext};
use crate::error::TriggerError;
use crate::triggers::report::{escape, HtmlReportTrigger};

/// Transport security of the SMTP connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Plain connection
    #[default]
    Disabled,
    /// Implicit TLS
    Ssl,
    /// Upgrade with STARTTLS
    Starttls,
}

impl SmtpSecurity {
    /// Conventional port for this mode
    pub fn default_port(self) -> u16 {
        match self {
            SmtpSecurity::Disabled => 25,
            SmtpSecurity::Ssl => 465,
            SmtpSecurity::Starttls => 587,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct EmailSettings {
    host: String,
    port: Option<u16>,
    sender: String,
    receivers: Vec<String>,
    #[serde(default)]
    ssl: SmtpSecurity,
    user: Option<String>,
    password: Option<String>,
    #[serde(default = "default_true")]
    no_empty_report: bool,
    #[serde(default)]
    full_report: bool,
}

/// Sends build reports by mail
#[derive(Debug, Clone)]
pub struct EmailReportTrigger {
    name: String,
    context: TriggerContext,
    host: String,
    port: u16,
    security: SmtpSecurity,
    sender: Mailbox,
    receivers: Vec<Mailbox>,
    credentials: Option<Credentials>,
    no_empty_report: bool,
    full_report: bool,
}

impl EmailReportTrigger {
    /// Subject line of every report
    pub fn subject(&self) -> String {
        format!(
            "{} ({}) build report",
            self.context.repository,
            self.context.paths.architecture()
        )
    }

    /// Render the report body for the changed bases
    pub fn render(&self, snapshot: &RepositorySnapshot, changed: &BTreeSet<String>) -> String {
        let mut html = String::new();
        let _ = writeln!(html, "<!DOCTYPE html>\n<html>\n<body>");
        let _ = writeln!(html, "<h1>{}</h1>", escape(&self.subject()));
        let _ = writeln!(html, "<table>");
        let _ = writeln!(html, "<tr><th>Base</th><th>Version</th><th>Status</th></tr>");
        for base in changed {
            let (version, status) = match snapshot.get(base) {
                Some(record) => {
                    let status = match &record.status.reason {
                        Some(reason) => format!("{} ({reason})", record.status.status),
                        None => record.status.status.to_string(),
                    };
                    (record.package.version.to_string(), status)
                }
                None => (String::new(), "removed".to_string()),
            };
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(base),
                escape(&version),
                escape(&status)
            );
        }
        let _ = writeln!(html, "</table>\n</body>\n</html>");
        html
    }

    /// Compose the message for a run
    pub fn message(&self, snapshot: &RepositorySnapshot, changed: &BTreeSet<String>) -> Result<Message, TriggerError> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(self.subject());
        for receiver in &self.receivers {
            builder = builder.to(receiver.clone());
        }

        let body = SinglePart::html(self.render(snapshot, changed));
        let message = if self.full_report {
            let listing = HtmlReportTrigger::new(&self.name, "index.html".into(), self.context.clone()).render(snapshot);
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(body)
                    .singlepart(Attachment::new("index.html".to_string()).body(listing, ContentType::TEXT_HTML)),
            )
        } else {
            builder.singlepart(body)
        };
        message.map_err(|e| self.failure(e))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, TriggerError> {
        let builder = match self.security {
            SmtpSecurity::Disabled => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host),
            SmtpSecurity::Ssl => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host).map_err(|e| self.failure(e))?
            }
            SmtpSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host).map_err(|e| self.failure(e))?
            }
        };
        let builder = builder.port(self.port);
        Ok(match &self.credentials {
            Some(credentials) => builder.credentials(credentials.clone()).build(),
            None => builder.build(),
        })
    }

    fn failure(&self, error: impl std::fmt::Display) -> TriggerError {
        TriggerError::Failed {
            name: self.name.clone(),
            error: error.to_string(),
        }
    }
}

impl Trigger for EmailReportTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        snapshot: &'a RepositorySnapshot,
        changed: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        Box::pin(async move {
            if changed.is_empty() && self.no_empty_report {
                tracing::debug!("Trigger {}: nothing changed, no report sent", self.name);
                return Ok(());
            }
            let message = self.message(snapshot, changed)?;
            self.transport()?
                .send(message)
                .await
                .map_err(|e| self.failure(e))?;
            tracing::info!(
                "Trigger {} mailed a report on {} base(s) to {} receiver(s)",
                self.name,
                changed.len(),
                self.receivers.len()
            );
            Ok(())
        })
    }
}

/// Factory for `type = "email"`
pub fn email_factory(
    settings: &TriggerSettings,
    context: &TriggerContext,
) -> Result<Box<dyn Trigger>, TriggerError> {
    let decoded: EmailSettings = decode_settings(settings)?;
    let invalid = |error: String| TriggerError::InvalidSettings {
        name: settings.name.clone(),
        error,
    };
    let mailbox = |address: &str| {
        address
            .parse::<Mailbox>()
            .map_err(|e| invalid(format!("invalid address '{address}': {e}")))
    };

    if decoded.receivers.is_empty() {
        return Err(invalid("at least one receiver is required".to_string()));
    }
    let sender = mailbox(&decoded.sender)?;
    let receivers = decoded
        .receivers
        .iter()
        .map(|address| mailbox(address))
        .collect::<Result<Vec<_>, _>>()?;
    let credentials = match (decoded.user, decoded.password) {
        (Some(user), Some(password)) => Some(Credentials::new(user, password)),
        (None, None) => None,
        _ => return Err(invalid("user and password must be set together".to_string())),
    };

    Ok(Box::new(EmailReportTrigger {
        name: settings.name.clone(),
        context: context.clone(),
        host: decoded.host,
        port: decoded.port.unwrap_or_else(|| decoded.ssl.default_port()),
        security: decoded.ssl,
        sender,
        receivers,
        credentials,
        no_empty_report: decoded.no_empty_report,
        full_report: decoded.full_report,
    }))
}
