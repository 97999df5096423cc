use crate::anomaly::{threshold_for, MAX_ANOMALY_SCORE};
use crate::history::HistoryError;
use crate::knowledge::KnowledgeBase;
use crate::narrative::{extract_json_object, PARSE_FAILED_CONFIDENCE, PARSE_FAILED_ROOT_CAUSE};
use crate::providers::ProviderError;
use crate::trend::detect_seasonality;
use crate::*;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use oxpulse_common::types::{CompareOp, Labels, Severity};
use oxpulse_storage::{AnalysisFilter, AnalysisStore, MemoryStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn points(values: &[f64], spacing: Duration) -> Vec<HistoryPoint> {
    let start = Utc::now() - spacing * values.len() as i32;
    values
        .iter()
        .enumerate()
        .map(|(i, v)| HistoryPoint {
            timestamp: start + spacing * i as i32,
            value: *v,
        })
        .collect()
}

fn empty_history() -> Arc<dyn MetricHistory> {
    Arc::new(StaticHistory::new())
}

struct FailingHistory;

#[async_trait]
impl MetricHistory for FailingHistory {
    async fn history(
        &self,
        _target_type: &str,
        _target_id: &str,
        _metric_name: &str,
        _lookback: Duration,
    ) -> Result<Vec<HistoryPoint>, HistoryError> {
        Err(HistoryError::Query("prometheus down".into()))
    }
}

// ---- anomaly ----

#[test]
fn flat_history_with_equal_value_is_normal() {
    let detector = AnomalyDetector::new(empty_history());
    let result = detector.analyze(&[10.0; 20], 10.0, Severity::High);
    assert!(!result.is_anomaly);
    assert_eq!(result.anomaly_score, 0.0);
    assert!(!result.z_score.is_nan());
    assert_eq!(result.stddev, 0.0);
    assert_eq!(result.deviation_level, DeviationLevel::Normal);
}

#[test]
fn flat_history_with_different_value_is_capped() {
    let detector = AnomalyDetector::new(empty_history());
    let result = detector.analyze(&[10.0; 20], 11.0, Severity::Medium);
    assert_eq!(result.anomaly_score, MAX_ANOMALY_SCORE);
    assert_eq!(result.deviation_level, DeviationLevel::Severe);
    assert!(result.is_anomaly);
}

#[test]
fn thresholds_depend_on_severity() {
    assert_eq!(threshold_for(Severity::Critical), 1.5);
    assert_eq!(threshold_for(Severity::Low), 2.5);
    assert_eq!(threshold_for(Severity::High), 2.0);
    assert_eq!(threshold_for(Severity::Medium), 2.0);
}

#[test]
fn deviation_buckets() {
    // Alternating 0/2 around mean 1; sample stddev of 10 points is sqrt(10/9).
    let history: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 0.0 } else { 2.0 }).collect();
    let detector = AnomalyDetector::new(empty_history());
    let stddev = (10.0f64 / 9.0).sqrt();
    let at = |z: f64| 1.0 + z * stddev;

    let normal = detector.analyze(&history, at(1.9), Severity::High);
    assert_eq!(normal.deviation_level, DeviationLevel::Normal);
    assert!((normal.z_score - 1.9).abs() < 1e-9);

    let moderate = detector.analyze(&history, at(2.9), Severity::High);
    assert_eq!(moderate.deviation_level, DeviationLevel::Moderate);

    let high = detector.analyze(&history, at(3.9), Severity::High);
    assert_eq!(high.deviation_level, DeviationLevel::High);

    let severe = detector.analyze(&history, at(-4.5), Severity::High);
    assert_eq!(severe.deviation_level, DeviationLevel::Severe);
    assert!(severe.z_score < 0.0);

    // The same deviation is an anomaly for a critical rule only.
    let critical = detector.analyze(&history, at(1.9), Severity::Critical);
    assert_eq!(critical.deviation_level, DeviationLevel::Moderate);
}

#[test]
fn anomaly_confidence_grows_with_history_and_caps() {
    let detector = AnomalyDetector::new(empty_history());
    let small: Vec<f64> = (0..20).map(|i| i as f64).collect();
    assert!((detector.analyze(&small, 5.0, Severity::High).confidence - 0.7).abs() < 1e-9);
    let large: Vec<f64> = (0..500).map(|i| i as f64).collect();
    assert_eq!(detector.analyze(&large, 5.0, Severity::High).confidence, 0.95);
}

#[tokio::test]
async fn anomaly_with_insufficient_history_is_low_confidence_normal() {
    let history = Arc::new(StaticHistory::new());
    history.insert_values("host-1", "cpu", &[1.0, 2.0, 3.0], Duration::minutes(1));
    let detector = AnomalyDetector::new(history);
    let result = detector
        .detect("host", "host-1", "cpu", 99.0, Severity::Critical)
        .await;
    assert!(!result.is_anomaly);
    assert_eq!(result.confidence, 0.3);
    assert_eq!(result.sample_count, 3);
}

#[tokio::test]
async fn anomaly_history_failure_degrades() {
    let detector = AnomalyDetector::new(Arc::new(FailingHistory));
    let result = detector
        .detect("host", "host-1", "cpu", 99.0, Severity::Critical)
        .await;
    assert!(!result.is_anomaly);
    assert_eq!(result.confidence, 0.3);
}

#[tokio::test]
async fn anomaly_uses_stored_history() {
    let history = Arc::new(StaticHistory::new());
    let values: Vec<f64> = (0..30).map(|i| 50.0 + (i % 3) as f64).collect();
    history.insert_values("host-1", "cpu", &values, Duration::minutes(5));
    let detector = AnomalyDetector::new(history);
    let result = detector
        .detect("host", "host-1", "cpu", 95.0, Severity::High)
        .await;
    assert!(result.is_anomaly);
    assert_eq!(result.sample_count, 30);
    assert_eq!(result.deviation_level, DeviationLevel::Severe);
}

// ---- trend ----

#[test]
fn linear_series_continues_the_line() {
    let values: Vec<f64> = (0..20).map(|x| 2.0 * x as f64 + 1.0).collect();
    let predictor = TrendPredictor::new(empty_history());
    let result = predictor.analyze(&points(&values, Duration::minutes(5)), 39.0);

    assert_eq!(result.direction, TrendDirection::Increasing);
    assert!((result.slope - 2.0).abs() < 1e-9);
    assert!((result.intercept - 1.0).abs() < 1e-9);
    assert_eq!(result.predictions.len(), 6);
    for (i, p) in result.predictions.iter().enumerate() {
        let x = (20 + i) as f64;
        assert!((p - (2.0 * x + 1.0)).abs() < 1e-9, "prediction {i} = {p}");
    }
    assert_eq!(result.risk_level, RiskLevel::High);
    assert!((result.accuracy - 0.8).abs() < 1e-9);
    assert!((result.confidence - 0.7).abs() < 1e-9);
    assert!(!result.seasonal);
}

#[test]
fn trend_direction_and_risk_thresholds() {
    let predictor = TrendPredictor::new(empty_history());
    let falling: Vec<f64> = (0..10).map(|x| 100.0 - 0.7 * x as f64).collect();
    let result = predictor.analyze(&points(&falling, Duration::minutes(1)), 93.0);
    assert_eq!(result.direction, TrendDirection::Decreasing);
    assert_eq!(result.risk_level, RiskLevel::Medium);

    let flat: Vec<f64> = (0..10).map(|x| 5.0 + 0.05 * x as f64).collect();
    let result = predictor.analyze(&points(&flat, Duration::minutes(1)), 5.5);
    assert_eq!(result.direction, TrendDirection::Stable);
    assert_eq!(result.risk_level, RiskLevel::Low);
}

#[test]
fn steep_slope_keeps_accuracy_floor() {
    let values: Vec<f64> = (0..10).map(|x| 20.0 * x as f64).collect();
    let predictor = TrendPredictor::new(empty_history());
    let result = predictor.analyze(&points(&values, Duration::minutes(1)), 180.0);
    assert_eq!(result.accuracy, 0.6);
}

#[tokio::test]
async fn trend_with_insufficient_data_projects_current_value() {
    let history = Arc::new(StaticHistory::new());
    history.insert_values("host-1", "cpu", &[1.0, 5.0, 9.0], Duration::minutes(1));
    let predictor = TrendPredictor::new(history);
    let result = predictor.predict("host", "host-1", "cpu", 42.0).await;
    assert_eq!(result.direction, TrendDirection::Stable);
    assert_eq!(result.predictions, vec![42.0; 6]);
    assert_eq!(result.confidence, 0.3);
    assert_eq!(result.sample_count, 3);
}

#[test]
fn daily_sine_is_seasonal() {
    // Three days of hourly samples with a 24h cycle.
    let values: Vec<f64> = (0..72)
        .map(|i| 50.0 + 10.0 * (2.0 * std::f64::consts::PI * i as f64 / 24.0).sin())
        .collect();
    let series = points(&values, Duration::hours(1));
    let predictor = TrendPredictor::new(empty_history());
    let result = predictor.analyze(&series, 50.0);
    assert!(result.seasonal);
}

#[test]
fn linear_and_irregular_series_are_not_seasonal() {
    let linear: Vec<f64> = (0..72).map(|i| 3.0 * i as f64).collect();
    let (slope, intercept) = trend::linear_fit(&linear).unwrap();
    assert!(!detect_seasonality(
        &points(&linear, Duration::hours(1)),
        slope,
        intercept
    ));

    let irregular: Vec<f64> = (0..72).map(|i| ((i * 41) % 101) as f64).collect();
    let (slope, intercept) = trend::linear_fit(&irregular).unwrap();
    assert!(!detect_seasonality(
        &points(&irregular, Duration::hours(1)),
        slope,
        intercept
    ));
}

#[test]
fn short_series_scans_lags() {
    // Minute spacing makes the daily lag unusable; period 4 is found by the scan.
    let values: Vec<f64> = (0..24).map(|i| [0.0, 5.0, 0.0, -5.0][i % 4]).collect();
    let (slope, intercept) = trend::linear_fit(&values).unwrap();
    assert!(detect_seasonality(
        &points(&values, Duration::minutes(1)),
        slope,
        intercept
    ));
}

// ---- knowledge ----

#[test]
fn knowledge_lookup_prefers_metric_matches() {
    let kb = KnowledgeBase::builtin();
    let hits = kb.lookup("system.cpu.usage", Severity::Critical, 3);
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].title, "CPU saturation");
    assert!(hits[1..].iter().all(|e| e.severities.contains(&Severity::Critical)));
}

#[test]
fn knowledge_lookup_without_matches_is_empty() {
    let kb = KnowledgeBase::builtin();
    assert!(kb.lookup("queue_depth", Severity::Info, 3).is_empty());
}

#[test]
fn knowledge_file_extends_builtin() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("kb.json");
    std::fs::write(
        &path,
        r#"[{"title":"Queue backlog","metric_keywords":["queue"],"content":"Scale consumers."}]"#,
    )
    .unwrap();
    let kb = KnowledgeBase::from_json_file(&path).unwrap();
    assert_eq!(kb.len(), KnowledgeBase::builtin().len() + 1);
    let hits = kb.lookup("queue_depth", Severity::Info, 3);
    assert_eq!(hits[0].title, "Queue backlog");
}

// ---- narrative ----

#[test]
fn json_object_is_extracted_from_prose() {
    let text = "Sure! Here you go:\n```json\n{\"root_cause\": \"leak\", \"x\": {\"y\": 1}}\n```\nThanks";
    assert_eq!(
        extract_json_object(text),
        Some("{\"root_cause\": \"leak\", \"x\": {\"y\": 1}}")
    );
    assert_eq!(extract_json_object("no braces"), None);
    assert_eq!(extract_json_object("} backwards {"), None);
}

struct ScriptedProvider {
    reply: String,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(prompt.contains("Anomaly signal"));
        if self.reply == "!error" {
            return Err(ProviderError::Api {
                status: 500,
                body: "boom".into(),
            });
        }
        Ok(self.reply.clone())
    }
}

fn context(value: f64) -> RuleContext {
    let mut labels = Labels::new();
    labels.insert("env".into(), "prod".into());
    RuleContext {
        rule_id: "rule-1".into(),
        rule_name: "High CPU".into(),
        alert_id: Some("alert-1".into()),
        target_type: "host".into(),
        target_id: "host-1".into(),
        metric_name: "cpu".into(),
        value,
        threshold: 90.0,
        operator: CompareOp::GreaterThan,
        severity: Severity::Critical,
        labels,
    }
}

fn signals() -> (AnomalyResult, TrendResult) {
    let detector = AnomalyDetector::new(empty_history());
    let predictor = TrendPredictor::new(empty_history());
    let history: Vec<f64> = (0..20).map(|i| 50.0 + i as f64).collect();
    (
        detector.analyze(&history, 95.0, Severity::Critical),
        predictor.analyze(&points(&history, Duration::minutes(1)), 95.0),
    )
}

fn analyzer(provider: Option<Arc<dyn ChatProvider>>, store: Arc<MemoryStore>) -> NarrativeAnalyzer {
    NarrativeAnalyzer::new(
        provider,
        store,
        KnowledgeBase::builtin(),
        std::time::Duration::from_secs(1800),
    )
}

#[tokio::test]
async fn narrative_without_provider_is_unavailable() {
    let analyzer = analyzer(None, Arc::new(MemoryStore::new()));
    assert!(!analyzer.is_available());
    let (anomaly, trend) = signals();
    let err = analyzer.analyze(&context(95.0), &anomaly, &trend).await.unwrap_err();
    assert!(matches!(err, AnalyzerError::Unavailable));
}

#[tokio::test]
async fn narrative_is_parsed_and_persisted() {
    let store = Arc::new(MemoryStore::new());
    let provider = ScriptedProvider::new(
        r#"Analysis: {"narrative":"CPU spiked","root_cause":"runaway batch job",
        "recommendations":["kill job","add capacity"],"severity_assessment":"high","confidence":0.85}"#,
    );
    let analyzer = analyzer(Some(provider.clone()), store.clone());
    let (anomaly, trend) = signals();

    let result = analyzer.analyze(&context(95.0), &anomaly, &trend).await.unwrap();
    assert_eq!(result.root_cause, "runaway batch job");
    assert_eq!(result.recommendations, vec!["kill job", "add capacity"]);
    assert_eq!(result.severity_assessment, "high");
    assert_eq!(result.confidence, 0.85);
    assert_eq!(result.analysis_type, "narrative");
    assert_eq!(result.input.value, 95.0);

    let stored = store
        .list_analyses(
            &AnalysisFilter {
                alert_id: Some("alert-1".into()),
                ..Default::default()
            },
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, result.id);
}

#[tokio::test]
async fn unparseable_answer_falls_back() {
    let store = Arc::new(MemoryStore::new());
    let provider = ScriptedProvider::new("I think the CPU is busy.");
    let analyzer = analyzer(Some(provider), store.clone());
    let (anomaly, trend) = signals();

    let result = analyzer.analyze(&context(95.0), &anomaly, &trend).await.unwrap();
    assert_eq!(result.root_cause, PARSE_FAILED_ROOT_CAUSE);
    assert_eq!(result.confidence, PARSE_FAILED_CONFIDENCE);
    assert_eq!(result.narrative, "I think the CPU is busy.");
    assert_eq!(store.count_analyses(&AnalysisFilter::default()).await.unwrap(), 1);
}

#[tokio::test]
async fn confidence_is_clamped() {
    let provider = ScriptedProvider::new(r#"{"root_cause":"x","confidence":7}"#);
    let analyzer = analyzer(Some(provider), Arc::new(MemoryStore::new()));
    let (anomaly, trend) = signals();
    let result = analyzer.analyze(&context(95.0), &anomaly, &trend).await.unwrap();
    assert_eq!(result.confidence, 1.0);
}

#[tokio::test]
async fn identical_triggers_hit_the_cache() {
    let store = Arc::new(MemoryStore::new());
    let provider = ScriptedProvider::new(r#"{"root_cause":"disk full"}"#);
    let analyzer = analyzer(Some(provider.clone()), store.clone());
    let (anomaly, trend) = signals();

    let first = analyzer.analyze(&context(95.0), &anomaly, &trend).await.unwrap();
    let second = analyzer.analyze(&context(95.0), &anomaly, &trend).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.count_analyses(&AnalysisFilter::default()).await.unwrap(), 1);

    analyzer.analyze(&context(96.0), &anomaly, &trend).await.unwrap();
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn provider_failure_is_typed_and_not_persisted() {
    let store = Arc::new(MemoryStore::new());
    let provider = ScriptedProvider::new("!error");
    let analyzer = analyzer(Some(provider), store.clone());
    let (anomaly, trend) = signals();
    let err = analyzer.analyze(&context(95.0), &anomaly, &trend).await.unwrap_err();
    assert!(matches!(err, AnalyzerError::Provider(_)));
    assert_eq!(store.count_analyses(&AnalysisFilter::default()).await.unwrap(), 0);
}

#[test]
fn prompt_mentions_signals_and_knowledge() {
    let (anomaly, trend) = signals();
    let kb = KnowledgeBase::builtin();
    let entries = kb.lookup("cpu", Severity::Critical, 3);
    let prompt = prompt::build_narrative_prompt(&context(95.0), &anomaly, &trend, &entries);
    assert!(prompt.contains("High CPU"));
    assert!(prompt.contains("95.00 > 90.00"));
    assert!(prompt.contains("env=prod"));
    assert!(prompt.contains("CPU saturation"));
    assert!(prompt.contains(trend.direction.as_str()));
}
