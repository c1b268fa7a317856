//! DSL dispatch client: sends an optimized action batch to the remote
//! automation server with bounded retries and error classification.
//!
//! Every outcome is normalized into one [`ExecutionResult`] shape. Transport
//! failures are classified (timeout / HTTP / connection / other), retried per
//! policy, and always surfaced as warning strings; the client never returns a
//! bare error to the caller.

use crate::config::DispatchConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Raw HTTP reply from the transport. Status is classified by the client,
/// not the transport.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub status: u16,
    pub body: String,
}

/// Transport-level failure, pre-classified by the transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// HTTP seam for the dispatch client. Production uses [`HttpTransport`];
/// tests substitute their own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<TransportReply, TransportError>;

    async fn get(&self, url: &str, timeout: Duration) -> Result<u16, TransportError>;
}

/// reqwest-backed transport. Holds no per-call state; safe to share.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<TransportReply, TransportError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(TransportReply { status, body })
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<u16, TransportError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        Ok(response.status().as_u16())
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

/// Page observation reported by the automation server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Observation {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub short_summary: String,
    #[serde(default)]
    pub nav_detected: bool,
}

/// Structured failure carried inside an [`ExecutionResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Vec<String>,
}

/// Canonical result shape for one dispatched batch. Both the structured
/// server protocol and the legacy `{html, warnings}` protocol normalize into
/// this; unknown response fields are preserved in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<ExecutionError>,
    #[serde(default)]
    pub observation: Observation,
    #[serde(default)]
    pub is_done: bool,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionResult {
    /// Canonical success for an empty batch; no network is involved.
    pub fn empty_success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }
}

/// Pass warning strings through unchanged.
///
/// Historically a truncation point; the active contract preserves full
/// detail, so this deliberately enforces no character limit.
pub fn render_warning(message: String) -> String {
    message
}

/// Dispatch client over one configured automation server. Stateless between
/// calls; safe to call concurrently.
pub struct DispatchClient {
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
}

impl DispatchClient {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            transport: Arc::new(HttpTransport::new()),
            config,
        }
    }

    pub fn with_transport(config: DispatchConfig, transport: Arc<dyn Transport>) -> Self {
        Self { transport, config }
    }

    /// Execute one action batch.
    ///
    /// Empty/absent `actions` short-circuits to a canonical empty success.
    /// `expected_catalog_version`, when given, rides along in the payload so
    /// the server can reject stale-catalog batches.
    pub async fn execute_dsl(
        &self,
        payload: Value,
        expected_catalog_version: Option<&str>,
    ) -> ExecutionResult {
        if batch_is_empty(&payload) {
            tracing::debug!("empty action batch, skipping dispatch");
            return ExecutionResult::empty_success();
        }

        let mut body = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("payload".into(), other);
                map
            }
        };
        if let Some(version) = expected_catalog_version {
            body.insert("expected_catalog_version".into(), Value::String(version.into()));
        }
        let body = Value::Object(body);

        let url = self.config.execute_url();
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let max_attempts = self.config.max_attempts.max(1);

        let mut errors: Vec<String> = Vec::new();
        let mut probe_notes: Vec<String> = Vec::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                if let Err(note) = self.probe_health().await {
                    tracing::warn!(attempt, note = %note, "health probe failed before retry");
                    probe_notes.push(format!(
                        "Health probe before attempt {attempt} failed - {note}"
                    ));
                }
            }

            let failure = match self.transport.post_json(&url, &body, timeout).await {
                Ok(reply) if reply.status < 400 => {
                    match parse_response_body(&reply.body) {
                        Ok(mut result) => {
                            if attempt > 1 {
                                append_recovery_warnings(&mut result, &errors, attempt);
                                tracing::info!(
                                    attempt,
                                    failed_attempts = errors.len(),
                                    "execution succeeded on retry"
                                );
                            }
                            return result;
                        }
                        // Malformed body is a protocol failure: no retry.
                        Err(detail) => {
                            errors.push(detail);
                            break;
                        }
                    }
                }
                Ok(reply) => {
                    let mut detail = format!("HTTP {} error", reply.status);
                    if !reply.body.trim().is_empty() {
                        detail.push_str(" - ");
                        detail.push_str(reply.body.trim());
                    }
                    errors.push(detail);
                    if reply.status < 500 {
                        // Client errors will not resolve with retries.
                        break;
                    }
                    AttemptFailure::HttpServer
                }
                Err(TransportError::Timeout(detail)) => {
                    errors.push(format!("Request timeout - {detail}"));
                    AttemptFailure::Timeout
                }
                Err(TransportError::Connection(detail)) => {
                    errors.push(classify_connection_error(&detail));
                    AttemptFailure::Connection
                }
                Err(TransportError::Request(detail)) => {
                    errors.push(format!("Request error - {detail}"));
                    AttemptFailure::Request
                }
            };

            if attempt < max_attempts {
                let backoff = failure.backoff(attempt, self.config.backoff_unit_ms);
                tracing::warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %errors.last().map(String::as_str).unwrap_or(""),
                    "dispatch attempt failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }

        self.failure_result(errors, probe_notes, max_attempts)
    }

    /// Informational health probe; never gates retries.
    async fn probe_health(&self) -> Result<(), String> {
        let timeout = Duration::from_millis(self.config.health_timeout_ms);
        match self.transport.get(&self.config.health_url(), timeout).await {
            Ok(200) => Ok(()),
            Ok(status) => Err(format!("unhealthy status {status}")),
            Err(err) => Err(err.to_string()),
        }
    }

    fn failure_result(
        &self,
        errors: Vec<String>,
        probe_notes: Vec<String>,
        max_attempts: u32,
    ) -> ExecutionResult {
        let mut warnings: Vec<String> = errors
            .iter()
            .enumerate()
            .map(|(i, error)| {
                render_warning(format!(
                    "ERROR:auto:Attempt {}/{} - {}",
                    i + 1,
                    max_attempts,
                    error
                ))
            })
            .collect();
        let last = errors.last().cloned().unwrap_or_else(|| "unknown error".into());
        warnings.push(render_warning(format!(
            "ERROR:auto:All {max_attempts} execution attempts failed; last error: {last}"
        )));

        let attempts_made = errors.len();
        let mut details = errors;
        details.extend(probe_notes);

        ExecutionResult {
            success: false,
            error: Some(ExecutionError {
                code: "EXECUTION_FAILED".into(),
                message: format!("DSL execution failed after {attempts_made} attempt(s) - {last}"),
                details,
            }),
            warnings,
            ..ExecutionResult::default()
        }
    }
}

/// Which failure class an attempt hit; drives the backoff schedule.
#[derive(Debug, Clone, Copy)]
enum AttemptFailure {
    Timeout,
    HttpServer,
    Connection,
    Request,
}

impl AttemptFailure {
    fn backoff(self, attempt: u32, unit_ms: u64) -> Duration {
        let factor = match self {
            // Connection failures back off harder: the server may be
            // restarting.
            AttemptFailure::Connection => 2,
            AttemptFailure::Timeout | AttemptFailure::HttpServer | AttemptFailure::Request => 1,
        };
        Duration::from_millis(u64::from(attempt) * factor * unit_ms)
    }
}

fn batch_is_empty(payload: &Value) -> bool {
    match payload.get("actions") {
        None | Some(Value::Null) => true,
        Some(Value::Array(actions)) => actions.is_empty(),
        Some(_) => false,
    }
}

/// Parse a 2xx response body. A body already carrying `success` is the
/// structured protocol and passes through; a legacy `{html, warnings}` body
/// is coerced into the structured shape.
fn parse_response_body(body: &str) -> Result<ExecutionResult, String> {
    let value: Value =
        serde_json::from_str(body).map_err(|err| format!("Invalid JSON response - {err}"))?;
    let Value::Object(map) = value else {
        return Err("Invalid response - expected a JSON object".into());
    };
    if map.contains_key("success") {
        serde_json::from_value(Value::Object(map))
            .map_err(|err| format!("Malformed structured response - {err}"))
    } else {
        Ok(coerce_legacy_response(&map))
    }
}

fn coerce_legacy_response(map: &Map<String, Value>) -> ExecutionResult {
    let html = map
        .get("html")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let warnings = map
        .get("warnings")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    let correlation_id = map
        .get("correlation_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    ExecutionResult {
        success: true,
        html,
        warnings,
        correlation_id,
        ..ExecutionResult::default()
    }
}

fn append_recovery_warnings(result: &mut ExecutionResult, errors: &[String], attempt: u32) {
    for (i, error) in errors.iter().enumerate() {
        result.warnings.push(render_warning(format!(
            "ERROR:auto:Retry attempt {} - {}",
            i + 1,
            error
        )));
    }
    result.warnings.push(render_warning(format!(
        "INFO:auto:Execution succeeded on retry attempt {attempt} after {} failed attempts",
        errors.len()
    )));
}

/// Reclassify an opaque connection-error message into an actionable category
/// by substring matching.
fn classify_connection_error(detail: &str) -> String {
    let lower = detail.to_lowercase();
    let category = if lower.contains("refused") {
        "Connection refused - automation server is not running or not accepting connections"
    } else if lower.contains("dns")
        || lower.contains("name or service not known")
        || lower.contains("failed to lookup")
    {
        "DNS resolution failed - automation server hostname could not be resolved"
    } else if lower.contains("unreachable") {
        "Network unreachable - no route to automation server"
    } else if lower.contains("timed out") || lower.contains("timeout") {
        "Connection timeout - automation server did not accept the connection in time"
    } else {
        "Connection error"
    };
    format!("{category}: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;

    /// Transport that fails the test if any request is issued.
    struct NoCallTransport;

    #[async_trait]
    impl Transport for NoCallTransport {
        async fn post_json(
            &self,
            _url: &str,
            _body: &Value,
            _timeout: Duration,
        ) -> Result<TransportReply, TransportError> {
            panic!("no network call expected for an empty batch");
        }

        async fn get(&self, _url: &str, _timeout: Duration) -> Result<u16, TransportError> {
            panic!("no network call expected for an empty batch");
        }
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let client =
            DispatchClient::with_transport(DispatchConfig::default(), Arc::new(NoCallTransport));
        for payload in [
            serde_json::json!({}),
            serde_json::json!({"actions": []}),
            serde_json::json!({"actions": null}),
        ] {
            let result = client.execute_dsl(payload, None).await;
            assert!(result.success);
            assert!(result.error.is_none());
            assert!(result.html.is_empty());
            assert!(result.warnings.is_empty());
        }
    }

    #[test]
    fn connection_errors_are_reclassified() {
        assert!(classify_connection_error("tcp connect error: Connection refused (os error 111)")
            .starts_with("Connection refused"));
        assert!(classify_connection_error("dns error: failed to lookup address")
            .starts_with("DNS resolution failed"));
        assert!(classify_connection_error("Network is unreachable (os error 101)")
            .starts_with("Network unreachable"));
        assert!(classify_connection_error("connect timed out")
            .starts_with("Connection timeout"));
        assert!(classify_connection_error("broken pipe").starts_with("Connection error"));
    }

    #[test]
    fn legacy_response_is_coerced() {
        let result = parse_response_body(
            r#"{"html": "<p>hi</p>", "warnings": ["WARN:one"], "correlation_id": "abc"}"#,
        )
        .unwrap();
        assert!(result.success);
        assert_eq!(result.html, "<p>hi</p>");
        assert_eq!(result.warnings, vec!["WARN:one".to_string()]);
        assert_eq!(result.correlation_id.as_deref(), Some("abc"));
        assert!(!result.is_done);
        assert!(!result.complete);
    }

    #[test]
    fn structured_response_passes_through_with_extras() {
        let result = parse_response_body(
            r#"{"success": true, "html": "<p>x</p>", "warnings": [], "server_ms": 12}"#,
        )
        .unwrap();
        assert!(result.success);
        assert_eq!(result.extra.get("server_ms"), Some(&serde_json::json!(12)));
    }

    #[test]
    fn malformed_bodies_are_protocol_failures() {
        assert!(parse_response_body("not json").is_err());
        assert!(parse_response_body("[1, 2, 3]").is_err());
    }

    #[test]
    fn warnings_are_not_truncated() {
        let long = "x".repeat(10_000);
        assert_eq!(render_warning(long.clone()).len(), long.len());
    }
}
