use crate::api::{error_response, storage_error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use oxpulse_alert::EvalError;
use oxpulse_common::types::{Labels, MetricSample};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct SampleRequest {
    #[serde(default = "default_target_type")]
    pub target_type: String,
    pub target_id: String,
    pub metric_name: String,
    pub value: f64,
    /// Scalar values of any JSON type; stored in their string form.
    #[serde(default, deserialize_with = "deserialize_labels")]
    pub labels: Labels,
    /// Observation time; the receive time when omitted.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Strings are kept as-is, other scalars use their JSON text, nulls are dropped.
fn deserialize_labels<'de, D>(deserializer: D) -> Result<Labels, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect())
}

fn default_target_type() -> String {
    "host".to_string()
}

impl From<SampleRequest> for MetricSample {
    fn from(req: SampleRequest) -> Self {
        Self {
            target_type: req.target_type,
            target_id: req.target_id,
            metric_name: req.metric_name,
            value: req.value,
            labels: req.labels,
            timestamp: req.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Evaluates one sample against every matching rule.
pub async fn ingest_sample(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<SampleRequest>,
) -> Response {
    let sample = MetricSample::from(req);
    match state.evaluator.process_sample(&sample).await {
        Ok(outcome) => success_response(StatusCode::OK, &trace_id, outcome),
        Err(EvalError::InvalidSample(msg)) => {
            error_response(StatusCode::BAD_REQUEST, &trace_id, "invalid_sample", &msg)
        }
        Err(e) => storage_error_response(&trace_id, "Failed to evaluate sample", &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_accept_any_scalar() {
        let req: SampleRequest = serde_json::from_str(
            r#"{"target_id":"h1","metric_name":"cpu","value":1.0,"labels":{"core":3,"primary":true,"ratio":0.5,"zone":"eu"}}"#,
        )
        .unwrap();
        assert_eq!(req.labels.get("core").map(String::as_str), Some("3"));
        assert_eq!(req.labels.get("primary").map(String::as_str), Some("true"));
        assert_eq!(req.labels.get("ratio").map(String::as_str), Some("0.5"));
        assert_eq!(req.labels.get("zone").map(String::as_str), Some("eu"));
    }

    #[test]
    fn missing_or_null_labels_are_empty() {
        let req: SampleRequest =
            serde_json::from_str(r#"{"target_id":"h1","metric_name":"cpu","value":1.0}"#).unwrap();
        assert!(req.labels.is_empty());
        let req: SampleRequest = serde_json::from_str(
            r#"{"target_id":"h1","metric_name":"cpu","value":1.0,"labels":null}"#,
        )
        .unwrap();
        assert!(req.labels.is_empty());
        assert_eq!(req.target_type, "host");
    }
}
