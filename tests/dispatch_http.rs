//! Dispatch client behavior against a real HTTP mock: retry policy, error
//! classification, health probing, and legacy-response coercion.

use pagepilot::config::DispatchConfig;
use pagepilot::DispatchClient;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(server: &MockServer) -> DispatchConfig {
    DispatchConfig {
        base_url: server.uri(),
        timeout_ms: 2_000,
        health_timeout_ms: 500,
        max_attempts: 2,
        backoff_unit_ms: 10,
        ..DispatchConfig::default()
    }
}

fn batch() -> serde_json::Value {
    json!({"actions": [{"action": "click", "target": {"index": 1}}]})
}

#[tokio::test]
async fn success_passes_structured_response_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute-dsl"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "html": "<p>done</p>",
            "warnings": ["WARN:server:slow frame"],
            "correlation_id": "run-7",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DispatchClient::new(test_config(&server));
    let result = client.execute_dsl(batch(), None).await;
    assert!(result.success);
    assert_eq!(result.html, "<p>done</p>");
    assert_eq!(result.warnings, vec!["WARN:server:slow frame".to_string()]);
    assert_eq!(result.correlation_id.as_deref(), Some("run-7"));
}

#[tokio::test]
async fn legacy_response_is_coerced_into_structured_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute-dsl"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"html": "<p>legacy</p>", "warnings": []})),
        )
        .mount(&server)
        .await;

    let client = DispatchClient::new(test_config(&server));
    let result = client.execute_dsl(batch(), None).await;
    assert!(result.success);
    assert!(result.error.is_none());
    assert_eq!(result.html, "<p>legacy</p>");
    assert!(!result.is_done);
    assert!(!result.complete);
}

#[tokio::test]
async fn catalog_version_rides_along_in_the_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute-dsl"))
        .and(body_partial_json(json!({"expected_catalog_version": "cat-42"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = DispatchClient::new(test_config(&server));
    let result = client.execute_dsl(batch(), Some("cat-42")).await;
    assert!(result.success);
}

#[tokio::test]
async fn server_error_retries_then_succeeds_with_audit_warnings() {
    let server = MockServer::start().await;
    // First POST fails with a 5xx; the mock expires and the second attempt
    // reaches the success mock.
    Mock::given(method("POST"))
        .and(path("/execute-dsl"))
        .respond_with(ResponseTemplate::new(503).set_body_string("restarting"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/execute-dsl"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = DispatchClient::new(test_config(&server));
    let result = client.execute_dsl(batch(), None).await;
    assert!(result.success);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.starts_with("ERROR:auto:Retry attempt 1 - ") && w.contains("HTTP 503")));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("succeeded on retry attempt 2 after 1 failed attempts")));
}

#[tokio::test]
async fn timeout_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute-dsl"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true}))
                .set_delay(Duration::from_millis(800)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/execute-dsl"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.timeout_ms = 150;
    let client = DispatchClient::new(config);
    let result = client.execute_dsl(batch(), None).await;
    assert!(result.success);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("Retry attempt 1") && w.contains("timeout")));
}

#[tokio::test]
async fn client_error_aborts_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute-dsl"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such endpoint"))
        .expect(1) // a second attempt would fail this expectation
        .mount(&server)
        .await;

    let client = DispatchClient::new(test_config(&server));
    let result = client.execute_dsl(batch(), None).await;
    assert!(!result.success);
    let error = result.error.expect("structured error");
    assert_eq!(error.code, "EXECUTION_FAILED");
    assert_eq!(error.details.len(), 1);
    assert!(error.details[0].contains("HTTP 404"));
    assert!(error.details[0].contains("no such endpoint"));
}

#[tokio::test]
async fn exhausted_retries_report_every_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute-dsl"))
        .respond_with(ResponseTemplate::new(500).set_body_string("still broken"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = DispatchClient::new(test_config(&server));
    let result = client.execute_dsl(batch(), None).await;
    assert!(!result.success);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.starts_with("ERROR:auto:Attempt 1/2 - ")));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.starts_with("ERROR:auto:Attempt 2/2 - ")));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("All 2 execution attempts failed")));

    let error = result.error.expect("structured error");
    // Two attempt errors plus the recorded health-probe failure.
    assert_eq!(error.details.len(), 3);
    assert!(error.details[2].contains("Health probe before attempt 2"));
}

#[tokio::test]
async fn connection_refused_is_classified() {
    // Nothing listens on this port.
    let config = DispatchConfig {
        base_url: "http://127.0.0.1:1".into(),
        timeout_ms: 1_000,
        health_timeout_ms: 200,
        max_attempts: 1,
        backoff_unit_ms: 10,
        ..DispatchConfig::default()
    };
    let client = DispatchClient::new(config);
    let result = client.execute_dsl(batch(), None).await;
    assert!(!result.success);
    let error = result.error.expect("structured error");
    assert!(
        error.details[0].starts_with("Connection refused")
            || error.details[0].starts_with("Connection error"),
        "unexpected detail: {}",
        error.details[0]
    );
}
