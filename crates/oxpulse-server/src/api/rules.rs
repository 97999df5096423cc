use crate::api::pagination::{deserialize_optional_u64, PaginationParams};
use crate::api::{
    error_response, not_found, storage_error_response, success_paginated_response,
    success_response,
};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use oxpulse_alert::RuleError;
use oxpulse_common::types::{AlertRule, CompareOp, Labels, Severity, TargetSelector};
use oxpulse_storage::RuleFilter;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ListRulesParams {
    #[serde(default, rename = "name__contains")]
    name_contains: Option<String>,
    #[serde(default, rename = "metric__eq")]
    metric_eq: Option<String>,
    #[serde(default, rename = "severity__eq")]
    severity_eq: Option<String>,
    #[serde(default, rename = "enabled__eq")]
    enabled_eq: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    limit: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    offset: Option<u64>,
}

/// Body of rule create and update.
#[derive(Debug, Deserialize)]
pub struct RuleRequest {
    pub name: String,
    #[serde(default)]
    pub target: TargetSelector,
    pub metric: String,
    pub operator: CompareOp,
    pub threshold: f64,
    #[serde(default)]
    pub duration_secs: u64,
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub owner: String,
}

fn default_enabled() -> bool {
    true
}

impl RuleRequest {
    fn into_rule(self) -> AlertRule {
        let now = Utc::now();
        AlertRule {
            id: String::new(),
            name: self.name,
            target: self.target,
            metric: self.metric,
            operator: self.operator,
            threshold: self.threshold,
            duration_secs: self.duration_secs,
            severity: self.severity,
            enabled: self.enabled,
            labels: self.labels,
            channels: self.channels,
            owner: self.owner,
            created_at: now,
            updated_at: now,
        }
    }
}

fn rule_error_response(trace_id: &str, err: RuleError) -> Response {
    if err.is_conflict() {
        return error_response(
            StatusCode::CONFLICT,
            trace_id,
            "conflict",
            "Rule name already exists",
        );
    }
    match err {
        RuleError::Validation(e) => {
            error_response(StatusCode::BAD_REQUEST, trace_id, "invalid_rule", &e.to_string())
        }
        RuleError::NotFound(_) => not_found(trace_id, "Alert rule"),
        RuleError::Storage(e) => storage_error_response(trace_id, "Alert rule storage failed", &e),
    }
}

async fn list_rules(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListRulesParams>,
) -> Response {
    let severity_eq = match params.severity_eq.as_deref().map(str::parse::<Severity>) {
        None => None,
        Some(Ok(s)) => Some(s),
        Some(Err(e)) => {
            return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &e);
        }
    };
    let filter = RuleFilter {
        name_contains: params.name_contains,
        metric_eq: params.metric_eq,
        severity_eq,
        enabled_eq: params.enabled_eq,
    };
    let limit = PaginationParams::resolve_limit(params.limit);
    let offset = PaginationParams::resolve_offset(params.offset);

    let total = match state.rules.count_rules(&filter).await {
        Ok(c) => c,
        Err(e) => return storage_error_response(&trace_id, "Failed to count alert rules", &e),
    };
    match state.rules.list_rules(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => storage_error_response(&trace_id, "Failed to list alert rules", &e),
    }
}

async fn create_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<RuleRequest>,
) -> Response {
    match state.rules.create_rule(req.into_rule()).await {
        Ok(rule) => success_response(StatusCode::CREATED, &trace_id, rule),
        Err(e) => rule_error_response(&trace_id, e),
    }
}

async fn get_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.rules.get_rule(&id).await {
        Ok(Some(rule)) => success_response(StatusCode::OK, &trace_id, rule),
        Ok(None) => not_found(&trace_id, "Alert rule"),
        Err(e) => storage_error_response(&trace_id, "Failed to get alert rule", &e),
    }
}

async fn update_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RuleRequest>,
) -> Response {
    match state.rules.update_rule(&id, req.into_rule()).await {
        Ok(rule) => success_response(StatusCode::OK, &trace_id, rule),
        Err(e) => rule_error_response(&trace_id, e),
    }
}

async fn delete_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.rules.delete_rule(&id).await {
        Ok(rule) => success_response(StatusCode::OK, &trace_id, rule),
        Err(e) => rule_error_response(&trace_id, e),
    }
}

pub fn rule_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/alerts/rules", get(list_rules).post(create_rule))
        .route(
            "/v1/alerts/rules/{id}",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
}
