//! HTTP status report trigger
//!
//! PUTs the status document as JSON to a URL. Server errors and transport
//! failures are retried with exponential backoff; client errors are not.

use std::collections::BTreeSet;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::defaults;
use crate::core::config::TriggerSettings;
use crate::core::store::RepositorySnapshot;
use crate::core::trigger::{decode_settings, Trigger, TriggerContext};
use crate::error::TriggerError;
use crate::triggers::report::StatusDocument;

const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(30);

fn default_retries() -> u32 {
    defaults::MAX_REPORT_RETRIES
}

fn default_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize)]
struct HttpSettings {
    url: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default = "default_retries")]
    max_retries: u32,
    #[serde(default = "default_delay_ms")]
    base_delay_ms: u64,
}

/// Publishes the status document over HTTP
#[derive(Debug, Clone)]
pub struct HttpReportTrigger {
    name: String,
    url: String,
    token: Option<String>,
    client: reqwest::Client,
    max_retries: u32,
    base_delay_ms: u64,
    context: TriggerContext,
}

impl HttpReportTrigger {
    /// Create a trigger sending to `url`
    pub fn new(name: impl Into<String>, url: impl Into<String>, context: TriggerContext) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            token: None,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .connect_timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            max_retries: defaults::MAX_REPORT_RETRIES,
            base_delay_ms: default_delay_ms(),
            context,
        }
    }

    /// Set retry attempts and the initial backoff delay
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries.max(1);
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Send a bearer token
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    async fn put(&self, body: String) -> Result<(), String> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.base_delay_ms))
            .with_max_interval(MAX_RETRY_INTERVAL)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        let mut attempts = 0;
        backoff::future::retry(policy, || {
            attempts += 1;
            let attempt = attempts;
            let body = body.clone();
            async move {
                let mut request = self
                    .client
                    .put(&self.url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body);
                if let Some(token) = &self.token {
                    request = request.bearer_auth(token);
                }

                let error = match request.send().await {
                    Ok(response) if response.status().is_success() => return Ok(()),
                    Ok(response) => {
                        let status = response.status();
                        let message = format!("{} returned {}", self.url, status);
                        if !is_retryable(status) {
                            return Err(backoff::Error::permanent(message));
                        }
                        message
                    }
                    Err(e) => e.to_string(),
                };

                if attempt >= self.max_retries {
                    return Err(backoff::Error::permanent(format!(
                        "{error} (after {attempt} attempts)"
                    )));
                }
                tracing::debug!("Report attempt {} failed: {}", attempt, error);
                Err(backoff::Error::transient(error))
            }
        })
        .await
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

impl Trigger for HttpReportTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        snapshot: &'a RepositorySnapshot,
        _changed: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        Box::pin(async move {
            let failed = |error: String| TriggerError::Failed {
                name: self.name.clone(),
                error,
            };
            let body = StatusDocument::new(&self.context, snapshot)
                .to_json()
                .map_err(|e| failed(e.to_string()))?;
            self.put(body).await.map_err(failed)?;
            tracing::info!("Published status report to {}", self.url);
            Ok(())
        })
    }
}

/// Factory for `type = "http"`
pub fn http_factory(
    settings: &TriggerSettings,
    context: &TriggerContext,
) -> Result<Box<dyn Trigger>, TriggerError> {
    let decoded: HttpSettings = decode_settings(settings)?;
    if reqwest::Url::parse(&decoded.url).is_err() {
        return Err(TriggerError::InvalidSettings {
            name: settings.name.clone(),
            error: format!("invalid url '{}'", decoded.url),
        });
    }
    Ok(Box::new(
        HttpReportTrigger::new(&settings.name, decoded.url, context.clone())
            .with_retries(decoded.max_retries, decoded.base_delay_ms)
            .with_token(decoded.token),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::package::Package;
    use crate::core::status::BuildStatus;
    use crate::core::store::PackageRecord;
    use crate::core::version::PackageVersion;
    use crate::infra::dirs::RepositoryPaths;
    use std::collections::BTreeMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context() -> TriggerContext {
        TriggerContext::new("custom", RepositoryPaths::new("/srv/repo", "x86_64"))
    }

    fn snapshot() -> RepositorySnapshot {
        let mut records = BTreeMap::new();
        records.insert(
            "foo".to_string(),
            PackageRecord {
                package: Package::new("foo", PackageVersion::parse("1.0-1").unwrap()),
                status: BuildStatus::success(),
                artifacts: BTreeSet::new(),
            },
        );
        RepositorySnapshot::new(records)
    }

    #[tokio::test]
    async fn test_put_status_document() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/status"))
            .and(header("content-type", "application/json"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let trigger = HttpReportTrigger::new("http", format!("{}/status", mock_server.uri()), context())
            .with_token(Some("secret".to_string()));
        trigger.run(&snapshot(), &BTreeSet::new()).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        let document: StatusDocument = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(document.packages[0].base, "foo");
    }

    #[tokio::test]
    async fn test_retry_on_server_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let trigger = HttpReportTrigger::new("http", format!("{}/status", mock_server.uri()), context())
            .with_retries(3, 10);
        assert!(trigger.run(&snapshot(), &BTreeSet::new()).await.is_ok());
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_max_retries_exceeded() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&mock_server)
            .await;

        let trigger = HttpReportTrigger::new("http", format!("{}/status", mock_server.uri()), context())
            .with_retries(2, 10);
        let result = trigger.run(&snapshot(), &BTreeSet::new()).await;
        assert!(matches!(result, Err(TriggerError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&mock_server)
            .await;

        let trigger = HttpReportTrigger::new("http", format!("{}/status", mock_server.uri()), context())
            .with_retries(5, 10);
        assert!(trigger.run(&snapshot(), &BTreeSet::new()).await.is_err());
    }

    #[test]
    fn test_factory_validates_url() {
        let mut settings = TriggerSettings {
            name: "http".to_string(),
            kind: "http".to_string(),
            required: false,
            settings: toml::from_str("url = \"not a url\"").unwrap(),
        };
        assert!(matches!(
            http_factory(&settings, &context()),
            Err(TriggerError::InvalidSettings { .. })
        ));

        settings.settings = toml::from_str("url = \"https://example.com/status\"").unwrap();
        assert!(http_factory(&settings, &context()).is_ok());
    }
}
