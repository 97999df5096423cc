use crate::api::success_response;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::Response;

/// Background queue counters.
pub async fn queue_stats(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    success_response(StatusCode::OK, &trace_id, state.queue.stats())
}
