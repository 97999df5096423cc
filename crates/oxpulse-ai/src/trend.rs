//! Least-squares trend projection with a coarse daily-seasonality flag.

use crate::history::{HistoryPoint, MetricHistory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SECONDS_PER_DAY: f64 = 86_400.0;
const SEASONALITY_THRESHOLD: f64 = 0.6;
const LOW_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::Stable => "stable",
        }
    }

    fn from_slope(slope: f64) -> Self {
        if slope > 0.1 {
            Self::Increasing
        } else if slope < -0.1 {
            Self::Decreasing
        } else {
            Self::Stable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    fn from_slope(slope: f64) -> Self {
        let magnitude = slope.abs();
        if magnitude > 1.0 {
            Self::High
        } else if magnitude > 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub direction: TrendDirection,
    /// Change per sample step.
    pub slope: f64,
    pub intercept: f64,
    /// Projected values for the next steps after the last sample.
    pub predictions: Vec<f64>,
    pub risk_level: RiskLevel,
    pub accuracy: f64,
    pub confidence: f64,
    pub seasonal: bool,
    pub sample_count: usize,
}

pub struct TrendPredictor {
    history: Arc<dyn MetricHistory>,
    lookback: chrono::Duration,
    min_points: usize,
    horizon: usize,
}

impl TrendPredictor {
    pub fn new(history: Arc<dyn MetricHistory>) -> Self {
        Self {
            history,
            lookback: chrono::Duration::days(7),
            min_points: 5,
            horizon: 6,
        }
    }

    pub async fn predict(
        &self,
        target_type: &str,
        target_id: &str,
        metric_name: &str,
        current: f64,
    ) -> TrendResult {
        match self
            .history
            .history(target_type, target_id, metric_name, self.lookback)
            .await
        {
            Ok(points) => self.analyze(&points, current),
            Err(e) => {
                tracing::warn!(
                    target_id,
                    metric = metric_name,
                    error = %e,
                    "Failed to load history for trend prediction"
                );
                self.flat(current, 0)
            }
        }
    }

    /// Pure fitting step of [`TrendPredictor::predict`].
    pub fn analyze(&self, points: &[HistoryPoint], current: f64) -> TrendResult {
        let n = points.len();
        if n < self.min_points.max(2) {
            return self.flat(current, n);
        }

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let Some((slope, intercept)) = linear_fit(&values) else {
            return self.flat(current, n);
        };

        let predictions = (n..n + self.horizon)
            .map(|x| slope * x as f64 + intercept)
            .collect();

        TrendResult {
            direction: TrendDirection::from_slope(slope),
            slope,
            intercept,
            predictions,
            risk_level: RiskLevel::from_slope(slope),
            accuracy: (1.0 - slope.abs() / 10.0).max(0.6),
            confidence: (n as f64 / 100.0 + 0.5).min(0.9),
            seasonal: detect_seasonality(points, slope, intercept),
            sample_count: n,
        }
    }

    fn flat(&self, current: f64, sample_count: usize) -> TrendResult {
        TrendResult {
            direction: TrendDirection::Stable,
            slope: 0.0,
            intercept: current,
            predictions: vec![current; self.horizon],
            risk_level: RiskLevel::Low,
            accuracy: 0.6,
            confidence: LOW_CONFIDENCE,
            seasonal: false,
            sample_count,
        }
    }
}

/// Ordinary least squares of `values` over their index. `None` when the
/// fit is degenerate.
pub fn linear_fit(values: &[f64]) -> Option<(f64, f64)> {
    let n = values.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;

    for (i, y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    let denom = n * sum_x2 - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;
    Some((slope, intercept))
}

/// Autocorrelation of the detrended series at the daily lag, or the best
/// lag in `2..=n/2` when the series is shorter than two days.
pub fn detect_seasonality(points: &[HistoryPoint], slope: f64, intercept: f64) -> bool {
    let n = points.len();
    if n < 4 {
        return false;
    }

    let residuals: Vec<f64> = points
        .iter()
        .enumerate()
        .map(|(i, p)| p.value - (slope * i as f64 + intercept))
        .collect();
    let mean = residuals.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = residuals.iter().map(|r| r - mean).collect();
    let variance = centered.iter().map(|r| r * r).sum::<f64>() / n as f64;
    if variance <= 1e-12 {
        return false;
    }

    let best = match daily_lag(points) {
        Some(lag) if lag >= 2 && lag * 2 <= n => autocorrelation(&centered, lag),
        _ => (2..=n / 2)
            .filter(|lag| n - lag >= 3)
            .map(|lag| autocorrelation(&centered, lag))
            .fold(f64::NEG_INFINITY, f64::max),
    };
    best >= SEASONALITY_THRESHOLD
}

fn daily_lag(points: &[HistoryPoint]) -> Option<usize> {
    let mut spacings: Vec<f64> = points
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 1000.0)
        .filter(|s| *s > 0.0)
        .collect();
    if spacings.is_empty() {
        return None;
    }
    spacings.sort_by(f64::total_cmp);
    let median = spacings[spacings.len() / 2];
    let lag = (SECONDS_PER_DAY / median).round();
    (lag.is_finite() && lag >= 1.0).then_some(lag as usize)
}

/// Pearson correlation of the series with itself shifted by `lag`.
fn autocorrelation(series: &[f64], lag: usize) -> f64 {
    let head = &series[..series.len() - lag];
    let tail = &series[lag..];
    let num: f64 = head.iter().zip(tail).map(|(a, b)| a * b).sum();
    let den = (head.iter().map(|a| a * a).sum::<f64>() * tail.iter().map(|b| b * b).sum::<f64>())
        .sqrt();
    if den <= f64::EPSILON {
        0.0
    } else {
        num / den
    }
}
