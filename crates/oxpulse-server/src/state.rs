use crate::config::ServerConfig;
use anyhow::Context;
use chrono::{DateTime, Utc};
use oxpulse_ai::{
    ChatProvider, KnowledgeBase, MetricHistory, NarrativeAnalyzer, OpenAiCompatProvider,
    PrometheusHistory,
};
use oxpulse_alert::queue::QueueConfig;
use oxpulse_alert::{
    AlertEvaluator, AnalysisPipeline, EvaluatorConfig, RuleRepository, TaskQueue,
};
use oxpulse_notify::plugin::{ChannelRegistry, PluginContext};
use oxpulse_notify::{Dispatcher, DispatcherConfig};
use oxpulse_storage::{AnalysisStore, AttemptStore, ChannelStore, Repository};
use std::sync::Arc;
use std::time::Duration;

/// 所有请求处理器共享的状态
#[derive(Clone)]
pub struct AppState {
    pub evaluator: Arc<AlertEvaluator>,
    pub rules: Arc<RuleRepository>,
    pub channels: Arc<dyn ChannelStore>,
    pub attempts: Arc<dyn AttemptStore>,
    pub analyses: Arc<dyn AnalysisStore>,
    pub registry: Arc<ChannelRegistry>,
    pub queue: Arc<TaskQueue>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wires the engine on top of `store`. Must run inside a Tokio runtime,
    /// since the task queue spawns its workers immediately.
    pub fn build<S>(store: Arc<S>, config: ServerConfig) -> anyhow::Result<Self>
    where
        S: Repository + 'static,
    {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.notification.timeout_secs.max(1)))
            .build()
            .context("failed to build HTTP client")?;
        let registry = Arc::new(ChannelRegistry::with_builtin(PluginContext {
            http,
            smtp_timeout: Duration::from_secs(config.notification.smtp_timeout_secs),
        }));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            Arc::clone(&registry),
            DispatcherConfig {
                timeout: Duration::from_secs(config.notification.timeout_secs),
                max_retries: config.notification.max_retries,
                ..Default::default()
            },
        ));

        let queue = Arc::new(TaskQueue::start(QueueConfig {
            capacity: config.queue.capacity,
            workers: config.queue.workers,
            enqueue_timeout: Duration::from_millis(config.queue.enqueue_timeout_ms),
        }));
        let rules = Arc::new(RuleRepository::new(store.clone(), config.rule_cache_ttl()));

        let mut evaluator = AlertEvaluator::new(
            Arc::clone(&rules),
            store.clone(),
            dispatcher,
            Arc::clone(&queue),
            EvaluatorConfig {
                equality_tolerance: config.evaluator.equality_tolerance,
            },
        );
        if let Some(pipeline) = build_pipeline(&config, store.clone())? {
            evaluator = evaluator.with_analysis(pipeline);
        }

        Ok(Self {
            evaluator: Arc::new(evaluator),
            rules,
            channels: store.clone(),
            attempts: store.clone(),
            analyses: store,
            registry,
            queue,
            start_time: Utc::now(),
            config: Arc::new(config),
        })
    }
}

/// Analysis needs a history source; without Prometheus it is skipped.
fn build_pipeline(
    config: &ServerConfig,
    store: Arc<dyn AnalysisStore>,
) -> anyhow::Result<Option<Arc<AnalysisPipeline>>> {
    let Some(url) = config.prometheus.url.as_deref().filter(|u| !u.is_empty()) else {
        tracing::info!("Prometheus not configured, alert analysis disabled");
        return Ok(None);
    };
    let history: Arc<dyn MetricHistory> = Arc::new(
        PrometheusHistory::new(
            url,
            config.prometheus.query_template.clone(),
            Duration::from_secs(config.prometheus.timeout_secs),
        )
        .context("failed to build Prometheus client")?,
    );

    let provider: Option<Arc<dyn ChatProvider>> = match &config.ai.api_key {
        Some(key) if config.ai.enabled && !key.is_empty() => Some(Arc::new(
            OpenAiCompatProvider::new(
                key.clone(),
                config.ai.model.clone(),
                config.ai.base_url.clone(),
                Duration::from_secs(config.ai.timeout_secs),
            )
            .context("failed to build language model client")?,
        )),
        _ => {
            if config.ai.enabled {
                tracing::warn!("AI enabled without an API key, narratives disabled");
            }
            None
        }
    };

    let knowledge = match &config.ai.knowledge_file {
        Some(path) => KnowledgeBase::from_json_file(path)?,
        None => KnowledgeBase::builtin(),
    };
    let narrative = Arc::new(NarrativeAnalyzer::new(
        provider,
        Arc::clone(&store),
        knowledge,
        Duration::from_secs(config.ai.cache_ttl_secs),
    ));
    tracing::info!(prometheus = %url, narratives = narrative.is_available(), "Alert analysis enabled");
    Ok(Some(Arc::new(AnalysisPipeline::new(history, narrative, store))))
}
