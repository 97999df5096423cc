use crate::api::pagination::{deserialize_optional_u64, PaginationParams};
use crate::api::{
    error_response, not_found, storage_error_response, success_empty_response,
    success_paginated_response, success_response,
};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use oxpulse_common::channel::{ChannelConfig, ChannelDefinition, SECRET_MASK};
use oxpulse_common::types::AttemptStatus;
use oxpulse_storage::AttemptFilter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---- Channels ----

/// A channel as returned by the API; secrets are masked.
#[derive(Debug, Serialize)]
pub struct ChannelResponse {
    pub id: String,
    pub name: String,
    pub channel_type: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ChannelDefinition> for ChannelResponse {
    fn from(def: ChannelDefinition) -> Self {
        Self {
            channel_type: def.channel_type().as_str().to_string(),
            config: def.config.redacted(),
            id: def.id,
            name: def.name,
            description: def.description,
            enabled: def.enabled,
            created_at: def.created_at,
            updated_at: def.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChannelRequest {
    pub name: String,
    pub channel_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub config: Value,
}

fn default_enabled() -> bool {
    true
}

/// Masked secrets sent back unchanged keep their stored value.
fn restore_masked_secrets(config: &mut Value, existing: &ChannelConfig) {
    let stored = existing.to_json();
    let (Some(obj), Some(stored)) = (config.as_object_mut(), stored.as_object()) else {
        return;
    };
    for (key, value) in obj.iter_mut() {
        if value.as_str() == Some(SECRET_MASK) {
            if let Some(original) = stored.get(key) {
                *value = original.clone();
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListChannelsParams {
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    limit: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    offset: Option<u64>,
}

async fn list_channels(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListChannelsParams>,
) -> Response {
    let limit = PaginationParams::resolve_limit(params.limit);
    let offset = PaginationParams::resolve_offset(params.offset);
    let total = match state.channels.count_channels().await {
        Ok(c) => c,
        Err(e) => return storage_error_response(&trace_id, "Failed to count channels", &e),
    };
    match state.channels.list_channels(limit, offset).await {
        Ok(defs) => {
            let items: Vec<ChannelResponse> = defs.into_iter().map(ChannelResponse::from).collect();
            success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset)
        }
        Err(e) => storage_error_response(&trace_id, "Failed to list channels", &e),
    }
}

async fn create_channel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<ChannelRequest>,
) -> Response {
    if req.name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, &trace_id, "invalid_channel", "name is required");
    }
    let config = match state.registry.validate(&req.channel_type, &req.config) {
        Ok(c) => c,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &trace_id, "invalid_channel", &e.to_string())
        }
    };
    let now = Utc::now();
    let def = ChannelDefinition {
        id: oxpulse_common::id::next_id(),
        name: req.name,
        description: req.description,
        enabled: req.enabled,
        config,
        created_at: now,
        updated_at: now,
    };
    match state.channels.insert_channel(&def).await {
        Ok(saved) => {
            tracing::info!(channel_id = %saved.id, name = %saved.name, "Notification channel created");
            success_response(StatusCode::CREATED, &trace_id, ChannelResponse::from(saved))
        }
        Err(e) if e.is_conflict() => error_response(
            StatusCode::CONFLICT,
            &trace_id,
            "conflict",
            "Channel name already exists",
        ),
        Err(e) => storage_error_response(&trace_id, "Failed to create channel", &e),
    }
}

async fn get_channel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.channels.get_channel(&id).await {
        Ok(Some(def)) => success_response(StatusCode::OK, &trace_id, ChannelResponse::from(def)),
        Ok(None) => not_found(&trace_id, "Channel"),
        Err(e) => storage_error_response(&trace_id, "Failed to get channel", &e),
    }
}

async fn update_channel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut req): Json<ChannelRequest>,
) -> Response {
    let existing = match state.channels.get_channel(&id).await {
        Ok(Some(def)) => def,
        Ok(None) => return not_found(&trace_id, "Channel"),
        Err(e) => return storage_error_response(&trace_id, "Failed to get channel", &e),
    };
    restore_masked_secrets(&mut req.config, &existing.config);
    let config = match state.registry.validate(&req.channel_type, &req.config) {
        Ok(c) => c,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &trace_id, "invalid_channel", &e.to_string())
        }
    };
    let def = ChannelDefinition {
        id: existing.id,
        name: req.name,
        description: req.description,
        enabled: req.enabled,
        config,
        created_at: existing.created_at,
        updated_at: Utc::now(),
    };
    match state.channels.update_channel(&def).await {
        Ok(Some(saved)) => {
            tracing::info!(channel_id = %saved.id, "Notification channel updated");
            success_response(StatusCode::OK, &trace_id, ChannelResponse::from(saved))
        }
        Ok(None) => not_found(&trace_id, "Channel"),
        Err(e) if e.is_conflict() => error_response(
            StatusCode::CONFLICT,
            &trace_id,
            "conflict",
            "Channel name already exists",
        ),
        Err(e) => storage_error_response(&trace_id, "Failed to update channel", &e),
    }
}

async fn delete_channel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.channels.delete_channel(&id).await {
        Ok(true) => {
            tracing::info!(channel_id = %id, "Notification channel deleted");
            success_empty_response(StatusCode::OK, &trace_id, "deleted")
        }
        Ok(false) => not_found(&trace_id, "Channel"),
        Err(e) => storage_error_response(&trace_id, "Failed to delete channel", &e),
    }
}

// ---- Attempts ----

#[derive(Debug, Deserialize)]
pub struct ListAttemptsParams {
    #[serde(default)]
    alert_id: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    limit: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    offset: Option<u64>,
}

async fn list_attempts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListAttemptsParams>,
) -> Response {
    let status = match params.status.as_deref().map(str::parse::<AttemptStatus>).transpose() {
        Ok(s) => s,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &e),
    };
    let filter = AttemptFilter {
        alert_id: params.alert_id,
        channel: params.channel,
        status,
    };
    let limit = PaginationParams::resolve_limit(params.limit);
    let offset = PaginationParams::resolve_offset(params.offset);
    let total = match state.attempts.count_attempts(&filter).await {
        Ok(c) => c,
        Err(e) => return storage_error_response(&trace_id, "Failed to count attempts", &e),
    };
    match state.attempts.list_attempts(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => storage_error_response(&trace_id, "Failed to list attempts", &e),
    }
}

pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/notifications/channels",
            get(list_channels).post(create_channel),
        )
        .route(
            "/v1/notifications/channels/{id}",
            get(get_channel).put(update_channel).delete(delete_channel),
        )
        .route("/v1/notifications/attempts", get(list_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masked_secret_keeps_stored_value() {
        let stored = ChannelConfig::parse(
            "dingtalk",
            &json!({"webhook_url": "https://oapi.dingtalk.com/robot/send?access_token=x", "secret": "SEC123"}),
        )
        .unwrap();
        let mut incoming = json!({
            "webhook_url": "https://oapi.dingtalk.com/robot/send?access_token=y",
            "secret": SECRET_MASK,
        });
        restore_masked_secrets(&mut incoming, &stored);
        assert_eq!(incoming["secret"], "SEC123");
        assert!(incoming["webhook_url"].as_str().unwrap().ends_with("=y"));
    }
}
