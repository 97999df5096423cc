mod common;

use axum::http::StatusCode;
use common::{
    assert_err_envelope, assert_ok_envelope, build_test_context, create_rule, post_sample,
    request_json, request_no_body,
};
use serde_json::json;

fn cpu_rule(name: &str) -> serde_json::Value {
    json!({
        "name": name,
        "metric": "cpu",
        "operator": ">",
        "threshold": 90.0,
        "severity": "critical",
    })
}

#[tokio::test]
async fn health_should_return_ok_envelope() {
    let ctx = build_test_context().await.expect("test context should build");
    let (status, body, trace) = request_no_body(&ctx.app, "GET", "/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert!(body["data"]["version"].is_string());
    let trace = trace.expect("trace header should be set");
    assert_eq!(trace.len(), 16);
    assert_eq!(body["trace_id"], trace.as_str());
}

#[tokio::test]
async fn rule_crud_roundtrip() {
    let ctx = build_test_context().await.expect("test context should build");
    let id = create_rule(&ctx.app, cpu_rule("cpu high")).await;

    let (status, body, _) =
        request_no_body(&ctx.app, "GET", &format!("/v1/alerts/rules/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["operator"], ">");
    assert_eq!(body["data"]["enabled"], true);

    let (status, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/alerts/rules?metric__eq=cpu&limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["limit"], 5);

    let mut updated = cpu_rule("cpu high");
    updated["threshold"] = json!(95.0);
    let (status, body, _) =
        request_json(&ctx.app, "PUT", &format!("/v1/alerts/rules/{id}"), updated).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["threshold"], 95.0);

    let (status, _, _) =
        request_no_body(&ctx.app, "DELETE", &format!("/v1/alerts/rules/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body, _) =
        request_no_body(&ctx.app, "GET", &format!("/v1/alerts/rules/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);

    // Deleted names are reusable.
    create_rule(&ctx.app, cpu_rule("cpu high")).await;
}

#[tokio::test]
async fn rule_validation_and_conflicts() {
    let ctx = build_test_context().await.expect("test context should build");
    let (status, body, _) =
        request_json(&ctx.app, "POST", "/v1/alerts/rules", cpu_rule("")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1201);

    let mut informational = cpu_rule("info only");
    informational["severity"] = json!("info");
    let (status, body, _) =
        request_json(&ctx.app, "POST", "/v1/alerts/rules", informational).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1201);

    create_rule(&ctx.app, cpu_rule("dup")).await;
    let (status, body, _) =
        request_json(&ctx.app, "POST", "/v1/alerts/rules", cpu_rule("dup")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_err_envelope(&body, 1005);

    let (status, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/alerts/rules?severity__eq=urgent").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);
}

#[tokio::test]
async fn samples_drive_alert_lifecycle() {
    let ctx = build_test_context().await.expect("test context should build");
    create_rule(&ctx.app, cpu_rule("cpu high")).await;

    let outcome = post_sample(&ctx.app, "host-1", "cpu", 95.0).await;
    assert_eq!(outcome["fired"], 1);
    let outcome = post_sample(&ctx.app, "host-1", "cpu", 97.0).await;
    assert_eq!(outcome["refreshed"], 1);

    let (status, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/alerts?status__eq=firing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    let alert = &body["data"]["items"][0];
    assert_eq!(alert["value"], 97.0);
    assert_eq!(alert["severity"], "critical");
    let id = alert["id"].as_str().unwrap().to_string();

    let outcome = post_sample(&ctx.app, "host-1", "cpu", 40.0).await;
    assert_eq!(outcome["resolved"], 1);

    let (status, body, _) = request_no_body(&ctx.app, "GET", &format!("/v1/alerts/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "resolved");
    assert!(body["data"]["resolved_by"].is_null());

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts/stats?days=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["by_status"]["resolved"], 1);
}

#[tokio::test]
async fn samples_accept_non_string_labels() {
    let ctx = build_test_context().await.expect("test context should build");
    create_rule(&ctx.app, cpu_rule("cpu high")).await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/samples",
        json!({
            "target_id": "host-1",
            "metric_name": "cpu",
            "value": 95.0,
            "labels": {"core": 3, "primary": true, "zone": "eu-1", "note": null},
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["fired"], 1);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts").await;
    let labels = &body["data"]["items"][0]["labels"];
    assert_eq!(labels["core"], "3");
    assert_eq!(labels["primary"], "true");
    assert_eq!(labels["zone"], "eu-1");
    assert!(labels.get("note").is_none());
}

#[tokio::test]
async fn operator_actions_enforce_state_machine() {
    let ctx = build_test_context().await.expect("test context should build");
    create_rule(&ctx.app, cpu_rule("cpu high")).await;
    post_sample(&ctx.app, "host-1", "cpu", 95.0).await;
    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts").await;
    let id = body["data"]["items"][0]["id"].as_str().unwrap().to_string();

    let ack = format!("/v1/alerts/{id}/acknowledge");
    let resolve = format!("/v1/alerts/{id}/resolve");

    let (status, body, _) = request_json(&ctx.app, "POST", &ack, json!({"user_id": "alice"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "acknowledged");
    assert_eq!(body["data"]["acknowledged_by"], "alice");

    let (status, body, _) = request_json(&ctx.app, "POST", &ack, json!({"user_id": "bob"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_err_envelope(&body, 1006);

    let (status, body, _) =
        request_json(&ctx.app, "POST", &resolve, json!({"user_id": "bob"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["resolved_by"], "bob");

    let (status, _, _) = request_json(&ctx.app, "POST", &resolve, json!({"user_id": "bob"})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, _) = request_json(&ctx.app, "POST", &resolve, json!({"user_id": " "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alerts/missing/resolve",
        json!({"user_id": "bob"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);
}

#[tokio::test]
async fn channels_are_validated_and_redacted() {
    let ctx = build_test_context().await.expect("test context should build");
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/notifications/channels",
        json!({
            "name": "dingtalk-ops",
            "channel_type": "dingtalk",
            "config": {
                "webhook_url": "https://oapi.dingtalk.com/robot/send?access_token=abc",
                "secret": "SECxyz"
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["config"]["secret"], "***");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/notifications/channels").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["config"]["secret"], "***");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/notifications/channels",
        json!({"name": "bad", "channel_type": "webhook", "config": {"url": "ftp://x", "method": "POST"}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1202);

    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/notifications/channels",
        json!({"name": "pager", "channel_type": "pagerduty", "config": {}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) =
        request_no_body(&ctx.app, "DELETE", &format!("/v1/notifications/channels/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) =
        request_no_body(&ctx.app, "GET", &format!("/v1/notifications/channels/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_delivery_is_recorded_as_attempt() {
    let ctx = build_test_context().await.expect("test context should build");
    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/notifications/channels",
        json!({
            "name": "dead-hook",
            "channel_type": "webhook",
            "config": {"url": "http://127.0.0.1:9/hook", "method": "POST"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let mut rule = cpu_rule("cpu high");
    rule["channels"] = json!(["dead-hook", "nonexistent"]);
    create_rule(&ctx.app, rule).await;
    let outcome = post_sample(&ctx.app, "host-1", "cpu", 99.0).await;
    assert_eq!(outcome["fired"], 1);
    ctx.state.queue.drain().await;

    let (status, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/notifications/attempts?channel=dead-hook").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["status"], "failed");

    // The alert itself is unaffected by the delivery failure.
    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts?status__eq=firing").await;
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn invalid_sample_is_rejected() {
    let ctx = build_test_context().await.expect("test context should build");
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/samples",
        json!({"target_id": "host-1", "metric_name": "", "value": 1.0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1203);
}

#[tokio::test]
async fn queue_and_analysis_endpoints() {
    let ctx = build_test_context().await.expect("test context should build");
    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/system/queue").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["capacity"], 1024);
    assert_eq!(body["data"]["workers"], 4);
    assert_eq!(body["data"]["dropped"], 0);

    let (status, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/analysis?target_id=host-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);
}
