#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use oxpulse_server::app;
use oxpulse_server::config::ServerConfig;
use oxpulse_server::state::AppState;
use oxpulse_storage::Store;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

pub async fn build_test_context() -> Result<TestContext> {
    oxpulse_common::id::init(1, 1);

    let temp_dir = tempfile::tempdir()?;
    let mut config = ServerConfig::default();
    config.database.data_dir = temp_dir.path().to_string_lossy().to_string();
    config.notification.timeout_secs = 2;
    config.notification.max_retries = 0;

    let store = Arc::new(Store::new(&config.database.connection_url()).await?);
    let state = AppState::build(store, config)?;
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Value,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

pub fn assert_ok_envelope(json: &Value) {
    assert_eq!(json["err_code"], 0);
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
}

pub fn assert_err_envelope(json: &Value, err_code: i32) {
    assert_eq!(json["err_code"], err_code);
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
    assert!(json.get("data").is_some());
    assert!(json["data"].is_null());
}

/// Posts one sample and returns the evaluation outcome.
pub async fn post_sample(app: &axum::Router, target_id: &str, metric: &str, value: f64) -> Value {
    let (status, body, _) = request_json(
        app,
        "POST",
        "/v1/samples",
        serde_json::json!({
            "target_type": "host",
            "target_id": target_id,
            "metric_name": metric,
            "value": value,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "sample rejected: {body}");
    assert_ok_envelope(&body);
    body["data"].clone()
}

pub async fn create_rule(app: &axum::Router, rule: Value) -> String {
    let (status, body, _) = request_json(app, "POST", "/v1/alerts/rules", rule).await;
    assert_eq!(status, StatusCode::CREATED, "rule rejected: {body}");
    body["data"]["id"]
        .as_str()
        .expect("rule id should exist")
        .to_string()
}
