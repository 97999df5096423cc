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
use axum::routing::{get, post};
use axum::{Json, Router};
use oxpulse_alert::AlertActionError;
use oxpulse_common::types::{AlertStatus, Severity};
use oxpulse_storage::AlertFilter;
use serde::Deserialize;

const DEFAULT_STATS_DAYS: u32 = 7;

#[derive(Debug, Deserialize)]
pub struct ListAlertsParams {
    #[serde(default, rename = "status__eq")]
    status_eq: Option<String>,
    #[serde(default, rename = "severity__eq")]
    severity_eq: Option<String>,
    #[serde(default, rename = "rule_id__eq")]
    rule_id_eq: Option<String>,
    #[serde(default, rename = "target_id__eq")]
    target_id_eq: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    limit: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    days: Option<u64>,
}

/// Body of acknowledge and resolve.
#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub user_id: String,
}

fn parse_filter(params: ListAlertsParams) -> Result<(AlertFilter, usize, usize), String> {
    let status = params
        .status_eq
        .as_deref()
        .map(str::parse::<AlertStatus>)
        .transpose()?;
    let severity = params
        .severity_eq
        .as_deref()
        .map(str::parse::<Severity>)
        .transpose()?;
    Ok((
        AlertFilter {
            status,
            severity,
            rule_id: params.rule_id_eq,
            target_id: params.target_id_eq,
            since: None,
        },
        PaginationParams::resolve_limit(params.limit),
        PaginationParams::resolve_offset(params.offset),
    ))
}

async fn list_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListAlertsParams>,
) -> Response {
    let (filter, limit, offset) = match parse_filter(params) {
        Ok(parsed) => parsed,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &msg),
    };
    let total = match state.evaluator.count_alerts(&filter).await {
        Ok(c) => c,
        Err(e) => return storage_error_response(&trace_id, "Failed to count alerts", &e),
    };
    match state.evaluator.list_alerts(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => storage_error_response(&trace_id, "Failed to list alerts", &e),
    }
}

async fn alert_stats(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Response {
    let days = params
        .days
        .map_or(DEFAULT_STATS_DAYS, |d| u32::try_from(d).unwrap_or(u32::MAX));
    match state.evaluator.stats(days).await {
        Ok(stats) => success_response(StatusCode::OK, &trace_id, stats),
        Err(e) => storage_error_response(&trace_id, "Failed to compute alert stats", &e),
    }
}

async fn get_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.evaluator.get_alert(&id).await {
        Ok(Some(alert)) => success_response(StatusCode::OK, &trace_id, alert),
        Ok(None) => not_found(&trace_id, "Alert"),
        Err(e) => storage_error_response(&trace_id, "Failed to get alert", &e),
    }
}

fn action_error_response(trace_id: &str, err: AlertActionError) -> Response {
    match err {
        AlertActionError::NotFound(_) => not_found(trace_id, "Alert"),
        AlertActionError::InvalidState(e) => {
            error_response(StatusCode::CONFLICT, trace_id, "invalid_state", &e.to_string())
        }
        AlertActionError::Storage(e) => storage_error_response(trace_id, "Alert transition failed", &e),
    }
}

fn require_user(trace_id: &str, req: &ActorRequest) -> Option<Response> {
    req.user_id.trim().is_empty().then(|| {
        error_response(
            StatusCode::BAD_REQUEST,
            trace_id,
            "bad_request",
            "user_id is required",
        )
    })
}

async fn acknowledge_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Response {
    if let Some(resp) = require_user(&trace_id, &req) {
        return resp;
    }
    match state.evaluator.acknowledge(&id, &req.user_id).await {
        Ok(alert) => success_response(StatusCode::OK, &trace_id, alert),
        Err(e) => action_error_response(&trace_id, e),
    }
}

async fn resolve_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Response {
    if let Some(resp) = require_user(&trace_id, &req) {
        return resp;
    }
    match state.evaluator.resolve(&id, &req.user_id).await {
        Ok(alert) => success_response(StatusCode::OK, &trace_id, alert),
        Err(e) => action_error_response(&trace_id, e),
    }
}

pub fn alert_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/alerts", get(list_alerts))
        .route("/v1/alerts/stats", get(alert_stats))
        .route("/v1/alerts/{id}", get(get_alert))
        .route("/v1/alerts/{id}/acknowledge", post(acknowledge_alert))
        .route("/v1/alerts/{id}/resolve", post(resolve_alert))
}
