//! Z-score anomaly detection against a series' own history.

use crate::history::MetricHistory;
use oxpulse_common::types::Severity;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Score reported when history is perfectly flat and the current value
/// differs from it.
pub const MAX_ANOMALY_SCORE: f64 = 10.0;

const LOW_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviationLevel {
    Normal,
    Moderate,
    High,
    Severe,
}

impl DeviationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Severe => "severe",
        }
    }

    fn bucket(score: f64, threshold: f64) -> Self {
        if score <= threshold {
            Self::Normal
        } else if score <= threshold * 1.5 {
            Self::Moderate
        } else if score <= threshold * 2.0 {
            Self::High
        } else {
            Self::Severe
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub is_anomaly: bool,
    /// `|z|`; never NaN.
    pub anomaly_score: f64,
    pub z_score: f64,
    pub mean: f64,
    pub stddev: f64,
    pub threshold: f64,
    pub deviation_level: DeviationLevel,
    pub confidence: f64,
    pub sample_count: usize,
}

impl AnomalyResult {
    fn insufficient(current: f64, threshold: f64, sample_count: usize) -> Self {
        Self {
            is_anomaly: false,
            anomaly_score: 0.0,
            z_score: 0.0,
            mean: current,
            stddev: 0.0,
            threshold,
            deviation_level: DeviationLevel::Normal,
            confidence: LOW_CONFIDENCE,
            sample_count,
        }
    }
}

/// Severity-adjusted Z threshold: critical rules flag smaller deviations.
pub fn threshold_for(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 1.5,
        Severity::Low => 2.5,
        _ => 2.0,
    }
}

pub struct AnomalyDetector {
    history: Arc<dyn MetricHistory>,
    lookback: chrono::Duration,
    min_points: usize,
}

impl AnomalyDetector {
    pub fn new(history: Arc<dyn MetricHistory>) -> Self {
        Self {
            history,
            lookback: chrono::Duration::days(30),
            min_points: 10,
        }
    }

    pub async fn detect(
        &self,
        target_type: &str,
        target_id: &str,
        metric_name: &str,
        current: f64,
        severity: Severity,
    ) -> AnomalyResult {
        let values: Vec<f64> = match self
            .history
            .history(target_type, target_id, metric_name, self.lookback)
            .await
        {
            Ok(points) => points.into_iter().map(|p| p.value).collect(),
            Err(e) => {
                tracing::warn!(
                    target_id,
                    metric = metric_name,
                    error = %e,
                    "Failed to load history for anomaly detection"
                );
                return AnomalyResult::insufficient(current, threshold_for(severity), 0);
            }
        };
        self.analyze(&values, current, severity)
    }

    /// Pure scoring step of [`AnomalyDetector::detect`].
    pub fn analyze(&self, values: &[f64], current: f64, severity: Severity) -> AnomalyResult {
        let threshold = threshold_for(severity);
        let n = values.len();
        if n < self.min_points.max(2) {
            return AnomalyResult::insufficient(current, threshold, n);
        }

        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        let stddev = variance.sqrt();

        let z_score = if stddev > f64::EPSILON {
            (current - mean) / stddev
        } else if (current - mean).abs() <= f64::EPSILON * mean.abs().max(1.0) {
            0.0
        } else {
            MAX_ANOMALY_SCORE.copysign(current - mean)
        };
        let anomaly_score = z_score.abs();
        let deviation_level = DeviationLevel::bucket(anomaly_score, threshold);

        AnomalyResult {
            is_anomaly: deviation_level != DeviationLevel::Normal,
            anomaly_score,
            z_score,
            mean,
            stddev,
            threshold,
            deviation_level,
            confidence: (n as f64 / 100.0 + 0.5).min(0.95),
            sample_count: n,
        }
    }
}
