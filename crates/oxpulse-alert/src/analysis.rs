//! Statistical and narrative enrichment of freshly fired alerts.

use chrono::Utc;
use oxpulse_ai::{
    AnalyzerError, AnomalyDetector, AnomalyResult, MetricHistory, NarrativeAnalyzer, RuleContext,
    TrendPredictor, TrendResult,
};
use oxpulse_common::types::{Alert, AlertRule, AnalysisInput, AnalysisResult};
use oxpulse_storage::AnalysisStore;
use std::sync::Arc;

pub const ANOMALY_ANALYSIS_TYPE: &str = "anomaly";
pub const TREND_ANALYSIS_TYPE: &str = "trend";

pub struct AnalysisPipeline {
    anomaly: AnomalyDetector,
    trend: TrendPredictor,
    narrative: Arc<NarrativeAnalyzer>,
    store: Arc<dyn AnalysisStore>,
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub anomaly: AnomalyResult,
    pub trend: TrendResult,
    pub narrative: Option<AnalysisResult>,
}

impl AnalysisPipeline {
    pub fn new(
        history: Arc<dyn MetricHistory>,
        narrative: Arc<NarrativeAnalyzer>,
        store: Arc<dyn AnalysisStore>,
    ) -> Self {
        Self {
            anomaly: AnomalyDetector::new(Arc::clone(&history)),
            trend: TrendPredictor::new(history),
            narrative,
            store,
        }
    }

    /// Runs detection, prediction and, when a provider is configured, the
    /// narrative step. The statistical signals are stored as their own
    /// analysis rows. Never fails: every error is logged and swallowed.
    pub async fn run(&self, rule: &AlertRule, alert: &Alert) -> PipelineOutput {
        let anomaly = self
            .anomaly
            .detect(
                &alert.target_type,
                &alert.target_id,
                &alert.metric_name,
                alert.value,
                alert.severity,
            )
            .await;
        let trend = self
            .trend
            .predict(
                &alert.target_type,
                &alert.target_id,
                &alert.metric_name,
                alert.value,
            )
            .await;

        tracing::info!(
            alert_id = %alert.id,
            z_score = anomaly.z_score,
            deviation = anomaly.deviation_level.as_str(),
            trend = trend.direction.as_str(),
            risk = trend.risk_level.as_str(),
            seasonal = trend.seasonal,
            "Alert signals computed"
        );

        for result in [anomaly_result(alert, &anomaly), trend_result(alert, &trend)] {
            if let Err(e) = self.store.insert_analysis(&result).await {
                tracing::warn!(
                    alert_id = %alert.id,
                    analysis_type = %result.analysis_type,
                    error = %e,
                    "Failed to store analysis signal"
                );
            }
        }

        let ctx = RuleContext {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            alert_id: Some(alert.id.clone()),
            target_type: alert.target_type.clone(),
            target_id: alert.target_id.clone(),
            metric_name: alert.metric_name.clone(),
            value: alert.value,
            threshold: alert.threshold,
            operator: rule.operator,
            severity: alert.severity,
            labels: alert.labels.clone(),
        };
        let narrative = match self.narrative.analyze(&ctx, &anomaly, &trend).await {
            Ok(result) => Some(result),
            Err(AnalyzerError::Unavailable) => {
                tracing::debug!(alert_id = %alert.id, "No language model configured, skipping narrative");
                None
            }
            Err(e) => {
                tracing::warn!(alert_id = %alert.id, error = %e, "Narrative analysis failed");
                None
            }
        };

        PipelineOutput {
            anomaly,
            trend,
            narrative,
        }
    }
}

fn signal_row(
    alert: &Alert,
    analysis_type: &str,
    narrative: String,
    severity_assessment: &str,
    confidence: f64,
) -> AnalysisResult {
    AnalysisResult {
        id: oxpulse_common::id::next_id(),
        analysis_type: analysis_type.to_string(),
        alert_id: Some(alert.id.clone()),
        target_type: alert.target_type.clone(),
        target_id: alert.target_id.clone(),
        input: AnalysisInput {
            metric_name: alert.metric_name.clone(),
            value: alert.value,
            threshold: alert.threshold,
            labels: alert.labels.clone(),
        },
        narrative,
        root_cause: String::new(),
        recommendations: Vec::new(),
        severity_assessment: severity_assessment.to_string(),
        confidence: confidence.clamp(0.0, 1.0),
        created_at: Utc::now(),
    }
}

fn anomaly_result(alert: &Alert, anomaly: &AnomalyResult) -> AnalysisResult {
    let narrative = format!(
        "z-score {:.2} against mean {:.2} (stddev {:.2}, {} samples): {} deviation{}",
        anomaly.z_score,
        anomaly.mean,
        anomaly.stddev,
        anomaly.sample_count,
        anomaly.deviation_level.as_str(),
        if anomaly.is_anomaly { ", anomalous" } else { "" },
    );
    signal_row(
        alert,
        ANOMALY_ANALYSIS_TYPE,
        narrative,
        anomaly.deviation_level.as_str(),
        anomaly.confidence,
    )
}

fn trend_result(alert: &Alert, trend: &TrendResult) -> AnalysisResult {
    let predictions = trend
        .predictions
        .iter()
        .map(|v| format!("{v:.2}"))
        .collect::<Vec<_>>()
        .join(", ");
    let narrative = format!(
        "{} trend, slope {:.4} per step over {} samples{}; next: [{}]",
        trend.direction.as_str(),
        trend.slope,
        trend.sample_count,
        if trend.seasonal { ", seasonal" } else { "" },
        predictions,
    );
    signal_row(
        alert,
        TREND_ANALYSIS_TYPE,
        narrative,
        trend.risk_level.as_str(),
        trend.confidence,
    )
}
