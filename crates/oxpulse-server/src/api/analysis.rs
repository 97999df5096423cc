use crate::api::pagination::{deserialize_optional_u64, PaginationParams};
use crate::api::{storage_error_response, success_paginated_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use oxpulse_storage::AnalysisFilter;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ListAnalysesParams {
    #[serde(default)]
    alert_id: Option<String>,
    #[serde(default)]
    target_id: Option<String>,
    #[serde(default)]
    metric_name: Option<String>,
    #[serde(default)]
    analysis_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    limit: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    offset: Option<u64>,
}

/// Stored analysis results, newest first.
pub async fn list_analyses(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListAnalysesParams>,
) -> Response {
    let filter = AnalysisFilter {
        alert_id: params.alert_id,
        target_id: params.target_id,
        metric_name: params.metric_name,
        analysis_type: params.analysis_type,
    };
    let limit = PaginationParams::resolve_limit(params.limit);
    let offset = PaginationParams::resolve_offset(params.offset);
    let total = match state.analyses.count_analyses(&filter).await {
        Ok(c) => c,
        Err(e) => return storage_error_response(&trace_id, "Failed to count analyses", &e),
    };
    match state.analyses.list_analyses(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => storage_error_response(&trace_id, "Failed to list analyses", &e),
    }
}
