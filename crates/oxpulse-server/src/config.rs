use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 配置文件未填写 API Key 时，从该环境变量读取。
pub const AI_API_KEY_ENV: &str = "OXPULSE_AI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub evaluator: EvaluatorSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub notification: NotificationSection,
    #[serde(default)]
    pub ai: AiSection,
    #[serde(default)]
    pub prometheus: PrometheusSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            database: DatabaseConfig::default(),
            evaluator: EvaluatorSection::default(),
            queue: QueueSection::default(),
            notification: NotificationSection::default(),
            ai: AiSection::default(),
            prometheus: PrometheusSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 完整数据库连接串，优先于 `data_dir`。
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            data_dir: default_data_dir(),
        }
    }
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!(
                "sqlite://{}/oxpulse.db?mode=rwc",
                self.data_dir.trim_end_matches('/')
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorSection {
    #[serde(default = "default_rule_cache_ttl_secs")]
    pub rule_cache_ttl_secs: u64,
    /// Absolute tolerance for `==`/`!=` rules; exact comparison when unset.
    #[serde(default)]
    pub equality_tolerance: Option<f64>,
}

impl Default for EvaluatorSection {
    fn default() -> Self {
        Self {
            rule_cache_ttl_secs: default_rule_cache_ttl_secs(),
            equality_tolerance: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default = "default_queue_workers")]
    pub workers: usize,
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            workers: default_queue_workers(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSection {
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_smtp_timeout_secs")]
    pub smtp_timeout_secs: u64,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_notify_timeout_secs(),
            max_retries: default_max_retries(),
            smtp_timeout_secs: default_smtp_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_ai_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// 额外知识库条目（JSON 文件）
    #[serde(default)]
    pub knowledge_file: Option<String>,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            base_url: None,
            model: None,
            timeout_secs: default_ai_timeout_secs(),
            cache_ttl_secs: default_ai_cache_ttl_secs(),
            knowledge_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusSection {
    /// Prometheus HTTP API 地址；未设置时不做基于历史数据的分析。
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub query_template: Option<String>,
    #[serde(default = "default_prometheus_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PrometheusSection {
    fn default() -> Self {
        Self {
            url: None,
            query_template: None,
            timeout_secs: default_prometheus_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_rule_cache_ttl_secs() -> u64 {
    300
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_queue_workers() -> usize {
    4
}

fn default_enqueue_timeout_ms() -> u64 {
    50
}

fn default_notify_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_smtp_timeout_secs() -> u64 {
    30
}

fn default_ai_timeout_secs() -> u64 {
    60
}

fn default_ai_cache_ttl_secs() -> u64 {
    1800
}

fn default_prometheus_timeout_secs() -> u64 {
    10
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("failed to parse config file '{path}'"))?;
        config.apply_env(std::env::var(AI_API_KEY_ENV).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 配置文件缺少 API Key 时用环境变量补齐。
    pub fn apply_env(&mut self, api_key: Option<String>) {
        let missing = self.ai.api_key.as_deref().map_or(true, str::is_empty);
        if missing {
            if let Some(key) = api_key.filter(|k| !k.is_empty()) {
                self.ai.api_key = Some(key);
            }
        }
    }

    pub fn rule_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.evaluator.rule_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.evaluator.rule_cache_ttl_secs, 300);
        assert_eq!(config.queue.capacity, 1024);
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.queue.enqueue_timeout_ms, 50);
        assert_eq!(config.notification.max_retries, 2);
        assert_eq!(config.ai.cache_ttl_secs, 1800);
        assert!(!config.ai.enabled);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(
            config.database.connection_url(),
            "sqlite://data/oxpulse.db?mode=rwc"
        );
    }

    #[test]
    fn sections_override_defaults() {
        let config = ServerConfig::parse(
            r#"
            http_port = 9000

            [database]
            url = "sqlite::memory:"

            [evaluator]
            equality_tolerance = 0.001

            [ai]
            enabled = true
            model = "gpt-4o"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.database.connection_url(), "sqlite::memory:");
        assert_eq!(config.evaluator.equality_tolerance, Some(0.001));
        assert_eq!(config.ai.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.ai.timeout_secs, 60);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn env_key_only_fills_missing() {
        let mut config = ServerConfig::default();
        config.apply_env(Some("from-env".into()));
        assert_eq!(config.ai.api_key.as_deref(), Some("from-env"));

        let mut config = ServerConfig::default();
        config.ai.api_key = Some("from-file".into());
        config.apply_env(Some("from-env".into()));
        assert_eq!(config.ai.api_key.as_deref(), Some("from-file"));
    }
}
