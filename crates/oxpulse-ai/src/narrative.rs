//! Language-model root-cause narratives for firing alerts.

use crate::anomaly::AnomalyResult;
use crate::knowledge::KnowledgeBase;
use crate::models::NarrativePayload;
use crate::prompt::{build_narrative_prompt, SYSTEM_PROMPT};
use crate::providers::{ChatProvider, ProviderError};
use crate::trend::TrendResult;
use chrono::Utc;
use moka::future::Cache;
use oxpulse_common::types::{AnalysisInput, AnalysisResult, CompareOp, Labels, Severity};
use oxpulse_storage::error::StorageError;
use oxpulse_storage::AnalysisStore;
use std::sync::Arc;
use std::time::Duration;

pub const ANALYSIS_TYPE: &str = "narrative";

/// Root cause recorded when the model answer is not valid JSON.
pub const PARSE_FAILED_ROOT_CAUSE: &str = "parsing failed";
pub const PARSE_FAILED_CONFIDENCE: f64 = 0.6;

const KNOWLEDGE_LIMIT: usize = 3;
const CACHE_CAPACITY: u64 = 10_000;

/// Alert and rule facts the narrative is written about.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub rule_id: String,
    pub rule_name: String,
    pub alert_id: Option<String>,
    pub target_type: String,
    pub target_id: String,
    pub metric_name: String,
    pub value: f64,
    pub threshold: f64,
    pub operator: CompareOp,
    pub severity: Severity,
    pub labels: Labels,
}

impl RuleContext {
    fn cache_key(&self) -> String {
        format!(
            "{ANALYSIS_TYPE}:{}:{}:{}:{}",
            self.target_type, self.target_id, self.metric_name, self.value
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    /// No language-model credential is configured. Callers skip narrative
    /// enrichment.
    #[error("Analyzer: no language-model provider configured")]
    Unavailable,

    #[error("Analyzer: provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Analyzer: failed to persist analysis: {0}")]
    Storage(#[from] StorageError),
}

pub struct NarrativeAnalyzer {
    provider: Option<Arc<dyn ChatProvider>>,
    store: Arc<dyn AnalysisStore>,
    knowledge: KnowledgeBase,
    cache: Cache<String, AnalysisResult>,
}

impl NarrativeAnalyzer {
    pub fn new(
        provider: Option<Arc<dyn ChatProvider>>,
        store: Arc<dyn AnalysisStore>,
        knowledge: KnowledgeBase,
        cache_ttl: Duration,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(cache_ttl)
            .build();
        Self {
            provider,
            store,
            knowledge,
            cache,
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    /// Produces and persists a narrative for `ctx`.
    ///
    /// Identical triggers within the cache TTL return the earlier result
    /// without calling the provider or writing a new row.
    pub async fn analyze(
        &self,
        ctx: &RuleContext,
        anomaly: &AnomalyResult,
        trend: &TrendResult,
    ) -> Result<AnalysisResult, AnalyzerError> {
        let provider = self.provider.as_ref().ok_or(AnalyzerError::Unavailable)?;

        let key = ctx.cache_key();
        if let Some(cached) = self.cache.get(&key).await {
            tracing::debug!(key = %key, "Narrative cache hit");
            return Ok(cached);
        }

        let knowledge = self
            .knowledge
            .lookup(&ctx.metric_name, ctx.severity, KNOWLEDGE_LIMIT);
        let prompt = build_narrative_prompt(ctx, anomaly, trend, &knowledge);
        let response = provider.complete(SYSTEM_PROMPT, &prompt).await?;

        let result = build_result(ctx, anomaly, trend, &response);
        self.store.insert_analysis(&result).await?;
        self.cache.insert(key, result.clone()).await;

        tracing::info!(
            analysis_id = %result.id,
            target_id = %ctx.target_id,
            metric = %ctx.metric_name,
            provider = provider.provider(),
            model = provider.model_name(),
            confidence = result.confidence,
            "Narrative analysis stored"
        );
        Ok(result)
    }
}

/// The substring from the first `{` to the last `}`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn build_result(
    ctx: &RuleContext,
    anomaly: &AnomalyResult,
    trend: &TrendResult,
    response: &str,
) -> AnalysisResult {
    let parsed = extract_json_object(response)
        .and_then(|json| serde_json::from_str::<NarrativePayload>(json).ok());

    let (narrative, root_cause, recommendations, severity_assessment, confidence) = match parsed {
        Some(payload) => {
            let fallback_confidence = (anomaly.confidence + trend.confidence) / 2.0;
            (
                payload.narrative.unwrap_or_else(|| response.trim().to_string()),
                payload
                    .root_cause
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "unknown".to_string()),
                payload.recommendations,
                payload
                    .severity_assessment
                    .unwrap_or_else(|| ctx.severity.to_string()),
                payload
                    .confidence
                    .filter(|c| c.is_finite())
                    .unwrap_or(fallback_confidence)
                    .clamp(0.0, 1.0),
            )
        }
        None => {
            tracing::warn!(
                target_id = %ctx.target_id,
                metric = %ctx.metric_name,
                "Narrative response is not valid JSON, using fallback"
            );
            (
                response.trim().to_string(),
                PARSE_FAILED_ROOT_CAUSE.to_string(),
                Vec::new(),
                ctx.severity.to_string(),
                PARSE_FAILED_CONFIDENCE,
            )
        }
    };

    AnalysisResult {
        id: oxpulse_common::id::next_id(),
        analysis_type: ANALYSIS_TYPE.to_string(),
        alert_id: ctx.alert_id.clone(),
        target_type: ctx.target_type.clone(),
        target_id: ctx.target_id.clone(),
        input: AnalysisInput {
            metric_name: ctx.metric_name.clone(),
            value: ctx.value,
            threshold: ctx.threshold,
            labels: ctx.labels.clone(),
        },
        narrative,
        root_cause,
        recommendations,
        severity_assessment,
        confidence,
        created_at: Utc::now(),
    }
}
