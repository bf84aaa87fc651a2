//! Per-user HTTP sessions against the vaccination service.
//!
//! Each virtual user owns one [`PageSession`], wrapping a [`reqwest::Client`]
//! with its own cookie jar so sign-ins don't bleed between users. The flows
//! drive sessions through the [`PageClient`] trait, which deals only in
//! fetched [`Page`]s and located [`Form`]s, keeping the flow sequencing
//! testable without a server.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::Configuration;
use crate::logger::LogMessage;
use crate::metrics::{Method, MetricMessage, RequestMetric};
use crate::page::{self, Form, Page};
use crate::VaxloadError;

/// The basis of the sessions' user agent.
static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// The name of the hidden CSRF field carried by the service's forms.
const AUTHENTICITY_TOKEN: &str = "authenticity_token";

/// Context captured when a request fails, written to the debug log when one
/// is enabled with `--debug-log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugEntry {
    /// Free-form tag describing what failed.
    pub tag: String,
    /// The metric of the failed request, when one was built.
    pub request: Option<RequestMetric>,
    /// The returned headers, when a response arrived.
    pub header: Option<String>,
    /// The returned body, when a response arrived.
    pub body: Option<String>,
}

impl DebugEntry {
    fn new(
        tag: &str,
        request: Option<&RequestMetric>,
        header: Option<&HeaderMap>,
        body: Option<&str>,
    ) -> Self {
        DebugEntry {
            tag: tag.to_string(),
            request: request.cloned(),
            header: header.map(|h| format!("{:?}", h)),
            body: body.map(|b| b.to_string()),
        }
    }
}

/// How the flows talk to the vaccination service.
///
/// The real implementation is [`PageSession`]; tests script a fake to walk
/// the flows through canned pages.
#[async_trait]
pub trait PageClient: Send {
    /// GET a path relative to the configured host, returning the final page.
    async fn fetch(&mut self, path: &str) -> Result<Page, VaxloadError>;

    /// Submit a form, with `extra` fields overriding the form's own values.
    async fn submit(&mut self, form: &Form, extra: &[(&str, &str)]) -> Result<Page, VaxloadError>;
}

/// One virtual user's browsing session.
///
/// Owns the cookie jar (and with it the signed-in state), the most recently
/// seen CSRF token, and the channels used to report each request to the
/// parent and the logger thread.
pub struct PageSession {
    /// The client is assigned to a session wide user agent and cookie jar.
    client: Client,
    /// The base URL requests are made against.
    base_url: Url,
    /// A local copy of the global configuration.
    config: Configuration,
    /// Which user thread this session belongs to, 1-indexed like the logs.
    user: usize,
    /// When the load test started, used for the `elapsed` metric field.
    pub(crate) started: Instant,
    /// The most recently scraped CSRF token, merged into any form submission
    /// that doesn't carry its own.
    backup_token: Option<String>,
    /// Channel for reporting request metrics to the parent.
    pub(crate) metrics_tx: Option<flume::Sender<MetricMessage>>,
    /// Channel for reporting errors and debug context to the logger thread.
    logger_tx: Option<flume::Sender<Option<LogMessage>>>,
}

impl PageSession {
    /// Create a session for one user thread, with its own cookie jar.
    pub(crate) fn new(
        user: usize,
        config: &Configuration,
        base_url: Url,
        started: Instant,
        metrics_tx: Option<flume::Sender<MetricMessage>>,
        logger_tx: Option<flume::Sender<Option<LogMessage>>>,
    ) -> Result<PageSession, VaxloadError> {
        let mut builder = Client::builder()
            .user_agent(APP_USER_AGENT)
            .cookie_store(true)
            .gzip(true)
            .timeout(std::time::Duration::from_secs(config.timeout.unwrap_or(60)));
        if config.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(PageSession {
            client: builder.build()?,
            base_url,
            config: config.clone(),
            user,
            started,
            backup_token: None,
            metrics_tx,
            logger_tx,
        })
    }

    /// Combine a path with the base URL, leaving already-absolute URLs alone.
    fn build_url(&self, path: &str) -> Result<String, VaxloadError> {
        if let Ok(parsed) = Url::parse(path) {
            if parsed.host().is_some() {
                return Ok(path.to_string());
            }
        }
        match self.base_url.join(path) {
            Ok(url) => Ok(url.to_string()),
            Err(parse_error) => Err(VaxloadError::InvalidHost {
                host: path.to_string(),
                detail: "failed to join path onto configured host".to_string(),
                parse_error,
            }),
        }
    }

    // Apply HTTP Basic Auth credentials when the test environment requires them.
    fn apply_auth(&self, request_builder: RequestBuilder) -> RequestBuilder {
        if let Some(auth_user) = &self.config.auth_user {
            request_builder.basic_auth(auth_user, self.config.auth_password.as_ref())
        } else {
            request_builder
        }
    }

    /// Execute a prepared request, timing it, reading the body, and reporting
    /// one [`RequestMetric`] to the parent whatever the outcome.
    async fn send(
        &mut self,
        method: Method,
        url: &str,
        name: &str,
        request_builder: RequestBuilder,
    ) -> Result<Page, VaxloadError> {
        let started = Instant::now();
        let mut request_metric =
            RequestMetric::new(method, name, url, self.started.elapsed().as_millis(), self.user);

        let response = request_builder.send().await;
        request_metric.set_response_time(started.elapsed().as_millis());

        match response {
            Ok(response) => {
                let status = response.status();
                let final_url = response.url().to_string();
                let headers = response.headers().clone();
                request_metric.set_final_url(&final_url);
                request_metric.set_status_code(status);
                debug!("{:?}: status_code {}", name, status);
                if !status.is_success() {
                    request_metric.success = false;
                    request_metric.error = format!("{}: {}", status, name);
                }

                let html = match response.text().await {
                    Ok(html) => html,
                    Err(e) => {
                        warn!("{:?}: failed to read body: {}", name, e);
                        request_metric.success = false;
                        request_metric.error = e.to_string();
                        self.log_failure("failed to read body", Some(&request_metric), Some(&headers), None);
                        self.record_request(request_metric);
                        return Err(VaxloadError::Reqwest(e));
                    }
                };

                if !request_metric.success {
                    self.log_failure(
                        &request_metric.error.clone(),
                        Some(&request_metric),
                        Some(&headers),
                        Some(&html),
                    );
                }
                self.record_request(request_metric);

                // Rails stamps a fresh CSRF token into every page it renders,
                // remember it for form submissions that lack their own.
                if let Some(token) = page::get_input_value(&html, AUTHENTICITY_TOKEN) {
                    self.backup_token = Some(token);
                }

                Ok(Page {
                    url: final_url,
                    status,
                    html,
                })
            }
            Err(e) => {
                warn!("{:?}: {}", name, e);
                request_metric.success = false;
                request_metric.error = e.to_string();
                self.log_failure(&e.to_string(), Some(&request_metric), None, None);
                self.record_request(request_metric);
                Err(VaxloadError::Reqwest(e))
            }
        }
    }

    // Forward a request metric to the parent and, if it failed and an error
    // log is enabled, to the logger thread.
    fn record_request(&self, request_metric: RequestMetric) {
        if !request_metric.success && !self.config.error_log.is_empty() {
            if let Some(logger_tx) = self.logger_tx.clone() {
                if let Err(e) = logger_tx.send(Some(LogMessage::Error(request_metric.clone()))) {
                    warn!("unable to send error to logger thread: {}", e);
                }
            }
        }
        // The channel is only unset when a session is driven directly from tests.
        if let Some(metrics_tx) = self.metrics_tx.clone() {
            if let Err(e) = metrics_tx.send(MetricMessage::Request(request_metric)) {
                error!("unable to communicate with parent thread, exiting: {}", e);
                std::process::exit(1);
            }
        }
    }

    // Capture failure context for the debug log when one is enabled.
    fn log_failure(
        &self,
        tag: &str,
        request: Option<&RequestMetric>,
        header: Option<&HeaderMap>,
        body: Option<&str>,
    ) {
        if !self.config.debug_log.is_empty() {
            if let Some(logger_tx) = self.logger_tx.clone() {
                if let Err(e) =
                    logger_tx.send(Some(LogMessage::Debug(DebugEntry::new(tag, request, header, body))))
                {
                    warn!("unable to send debug to logger thread: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl PageClient for PageSession {
    async fn fetch(&mut self, path: &str) -> Result<Page, VaxloadError> {
        let url = self.build_url(path)?;
        let name = normalize_request_name(path);
        let request_builder = self.apply_auth(self.client.get(&url));
        self.send(Method::Get, &url, &name, request_builder).await
    }

    async fn submit(&mut self, form: &Form, extra: &[(&str, &str)]) -> Result<Page, VaxloadError> {
        let url = self.build_url(&form.action)?;
        let name = normalize_request_name(&form.action);

        // The form's own values first, then the caller's fields on top.
        let mut params: Vec<(String, String)> = Vec::new();
        for (field, value) in &form.fields {
            if !extra.iter().any(|(extra_field, _)| extra_field == field) {
                params.push((field.clone(), value.clone()));
            }
        }
        for (field, value) in extra {
            params.push((field.to_string(), value.to_string()));
        }
        // The service rejects token-less posts, fall back to the last token seen.
        if !params.iter().any(|(field, _)| field == AUTHENTICITY_TOKEN) {
            if let Some(token) = &self.backup_token {
                params.push((AUTHENTICITY_TOKEN.to_string(), token.clone()));
            }
        }

        let (method, request_builder) = if form.method.eq_ignore_ascii_case("get") {
            (Method::Get, self.client.get(&url).query(&params))
        } else {
            (Method::Post, self.client.post(&url).form(&params))
        };
        let request_builder = self.apply_auth(request_builder);
        self.send(method, &url, &name, request_builder).await
    }
}

/// Build the name requests aggregate under: the path with its query string
/// dropped and numeric segments collapsed to `:id`, so requests against
/// different patients and sessions land in the same metrics row.
fn normalize_request_name(path: &str) -> String {
    let without_query = path.split('?').next().unwrap_or(path);
    let mut name = String::new();
    for segment in without_query.split('/') {
        if segment.is_empty() {
            continue;
        }
        name.push('/');
        if segment.chars().all(|c| c.is_ascii_digit()) {
            name.push_str(":id");
        } else {
            name.push_str(segment);
        }
    }
    if name.is_empty() {
        name.push('/');
    }
    name
}
