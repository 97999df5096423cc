//! Historical samples for a single series.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("History: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("History: query failed: {0}")]
    Query(String),
}

/// Source of past samples for a `(target, metric)` series, oldest first.
#[async_trait]
pub trait MetricHistory: Send + Sync {
    async fn history(
        &self,
        target_type: &str,
        target_id: &str,
        metric_name: &str,
        lookback: Duration,
    ) -> Result<Vec<HistoryPoint>, HistoryError>;
}

/// Prometheus is queried at most this many points per range.
const MAX_POINTS: i64 = 1000;
const MIN_STEP_SECS: i64 = 15;

/// Range-query client for the Prometheus HTTP API.
///
/// `query_template` may contain `{metric}`, `{target_id}` and
/// `{target_type}`. Dots in metric names are mapped to underscores, as
/// Prometheus metric names cannot contain them.
pub struct PrometheusHistory {
    client: reqwest::Client,
    base_url: String,
    query_template: String,
}

pub const DEFAULT_QUERY_TEMPLATE: &str = "{metric}{target_id=\"{target_id}\"}";

#[derive(Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: Option<PromData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct PromData {
    #[serde(default)]
    result: Vec<PromSeries>,
}

#[derive(Deserialize)]
struct PromSeries {
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl PrometheusHistory {
    pub fn new(
        base_url: &str,
        query_template: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, HistoryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            query_template: query_template.unwrap_or_else(|| DEFAULT_QUERY_TEMPLATE.to_string()),
        })
    }

    pub fn render_query(&self, target_type: &str, target_id: &str, metric_name: &str) -> String {
        self.query_template
            .replace("{metric}", &metric_name.replace('.', "_"))
            .replace("{target_id}", target_id)
            .replace("{target_type}", target_type)
    }

    /// Step in seconds keeping the range at or under [`MAX_POINTS`].
    pub fn step_for(lookback: Duration) -> i64 {
        let secs = lookback.num_seconds().max(1);
        ((secs + MAX_POINTS - 1) / MAX_POINTS).max(MIN_STEP_SECS)
    }
}

#[async_trait]
impl MetricHistory for PrometheusHistory {
    async fn history(
        &self,
        target_type: &str,
        target_id: &str,
        metric_name: &str,
        lookback: Duration,
    ) -> Result<Vec<HistoryPoint>, HistoryError> {
        let end = Utc::now();
        let start = end - lookback;
        let query = self.render_query(target_type, target_id, metric_name);
        let step = Self::step_for(lookback);

        tracing::debug!(query = %query, step, "Querying Prometheus range");

        let resp = self
            .client
            .get(format!("{}/api/v1/query_range", self.base_url))
            .query(&[
                ("query", query.clone()),
                ("start", start.timestamp().to_string()),
                ("end", end.timestamp().to_string()),
                ("step", format!("{step}s")),
            ])
            .send()
            .await?;
        let status = resp.status();
        let body: PromResponse = resp.json().await?;
        if !status.is_success() || body.status != "success" {
            return Err(HistoryError::Query(
                body.error
                    .unwrap_or_else(|| format!("HTTP {status} for query {query}")),
            ));
        }

        let mut points: Vec<HistoryPoint> = body
            .data
            .map(|d| d.result)
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|series| series.values)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(ts, raw)| {
                let value: f64 = raw.parse().ok()?;
                if !value.is_finite() {
                    return None;
                }
                let timestamp = Utc.timestamp_millis_opt((ts * 1000.0) as i64).single()?;
                Some(HistoryPoint { timestamp, value })
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }
}

type SeriesKey = (String, String);

/// Fixed in-memory series, keyed by `(target_id, metric_name)`.
#[derive(Default)]
pub struct StaticHistory {
    series: RwLock<HashMap<SeriesKey, Vec<HistoryPoint>>>,
}

impl StaticHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, target_id: &str, metric_name: &str, mut points: Vec<HistoryPoint>) {
        points.sort_by_key(|p| p.timestamp);
        self.series
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((target_id.to_string(), metric_name.to_string()), points);
    }

    /// Convenience: `values` spaced `spacing` apart, ending now.
    pub fn insert_values(&self, target_id: &str, metric_name: &str, values: &[f64], spacing: Duration) {
        let now = Utc::now();
        let n = values.len() as i32;
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| HistoryPoint {
                timestamp: now - spacing * (n - 1 - i as i32),
                value: *v,
            })
            .collect();
        self.insert(target_id, metric_name, points);
    }
}

#[async_trait]
impl MetricHistory for StaticHistory {
    async fn history(
        &self,
        _target_type: &str,
        target_id: &str,
        metric_name: &str,
        lookback: Duration,
    ) -> Result<Vec<HistoryPoint>, HistoryError> {
        let cutoff = Utc::now() - lookback;
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        Ok(series
            .get(&(target_id.to_string(), metric_name.to_string()))
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.timestamp >= cutoff)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_keeps_points_bounded() {
        assert_eq!(PrometheusHistory::step_for(Duration::hours(1)), 15);
        assert_eq!(PrometheusHistory::step_for(Duration::days(7)), 605);
        assert_eq!(PrometheusHistory::step_for(Duration::days(30)), 2592);
    }

    #[test]
    fn query_template_is_rendered() {
        let prom =
            PrometheusHistory::new("http://prom:9090/", None, std::time::Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            prom.render_query("host", "web-01", "cpu.usage"),
            "cpu_usage{target_id=\"web-01\"}"
        );
    }

    #[test]
    fn prometheus_matrix_decodes() {
        let body = r#"{"status":"success","data":{"resultType":"matrix","result":[
            {"metric":{"__name__":"cpu_usage"},"values":[[1700000000,"1.5"],[1700000015,"2"]]}]}}"#;
        let parsed: PromResponse = serde_json::from_str(body).unwrap();
        let values = &parsed.data.unwrap().result[0].values;
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].1, "2");
    }
}
