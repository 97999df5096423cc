//! Rule CRUD with a read-through cache of the per-metric rule sets.

use chrono::Utc;
use moka::future::Cache;
use oxpulse_common::error::ValidationError;
use oxpulse_common::types::AlertRule;
use oxpulse_storage::{RuleFilter, RuleStore, StorageError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

const KEY_PREFIX: &str = "rules:metric:";
const CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid rule: {0}")]
    Validation(#[from] ValidationError),

    #[error("rule {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RuleError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_conflict())
    }
}

fn metric_key(metric: &str) -> String {
    format!("{KEY_PREFIX}{metric}")
}

pub struct RuleRepository {
    store: Arc<dyn RuleStore>,
    cache: Cache<String, Arc<Vec<AlertRule>>>,
    /// Bumped by every invalidation; a load that spans a bump is not kept.
    generation: AtomicU64,
}

impl RuleRepository {
    pub fn new(store: Arc<dyn RuleStore>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();
        Self {
            store,
            cache,
            generation: AtomicU64::new(0),
        }
    }

    /// Enabled, live rules for `metric`, served from cache when fresh.
    pub async fn rules_for_metric(&self, metric: &str) -> Result<Arc<Vec<AlertRule>>, StorageError> {
        let key = metric_key(metric);
        if let Some(rules) = self.cache.get(&key).await {
            return Ok(rules);
        }
        let generation = self.generation.load(Ordering::Acquire);
        let rules = Arc::new(self.store.list_enabled_rules_for_metric(metric).await?);
        if self.generation.load(Ordering::Acquire) != generation {
            tracing::debug!(metric, "Rules changed during load, not caching");
            return Ok(rules);
        }
        self.cache.insert(key.clone(), Arc::clone(&rules)).await;
        // A mutation may have landed between the check and the insert.
        if self.generation.load(Ordering::Acquire) != generation {
            self.cache.invalidate(&key).await;
        } else {
            tracing::debug!(metric, count = rules.len(), "Loaded rules into cache");
        }
        Ok(rules)
    }

    /// Drops cached rule sets whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let prefix = prefix.to_string();
        if let Err(e) = self
            .cache
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
        {
            tracing::warn!(error = %e, "Prefix invalidation unavailable, clearing rule cache");
            self.cache.invalidate_all();
        }
    }

    fn invalidate_metric(&self, metric: &str) {
        self.invalidate_prefix(&metric_key(metric));
    }

    pub async fn create_rule(&self, mut rule: AlertRule) -> Result<AlertRule, RuleError> {
        rule.validate()?;
        let now = Utc::now();
        if rule.id.is_empty() {
            rule.id = oxpulse_common::id::next_id();
        }
        rule.created_at = now;
        rule.updated_at = now;

        let saved = self.store.insert_rule(&rule).await?;
        self.invalidate_metric(&saved.metric);
        tracing::info!(rule_id = %saved.id, name = %saved.name, metric = %saved.metric, "Alert rule created");
        Ok(saved)
    }

    /// Replaces the rule stored under `id`. Creation time is preserved.
    pub async fn update_rule(&self, id: &str, mut rule: AlertRule) -> Result<AlertRule, RuleError> {
        rule.validate()?;
        let existing = self
            .store
            .get_rule(id)
            .await?
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;

        rule.id = existing.id.clone();
        rule.created_at = existing.created_at;
        rule.updated_at = Utc::now();

        let saved = self
            .store
            .update_rule(&rule)
            .await?
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;
        self.invalidate_metric(&existing.metric);
        if existing.metric != saved.metric {
            self.invalidate_metric(&saved.metric);
        }
        tracing::info!(rule_id = %saved.id, "Alert rule updated");
        Ok(saved)
    }

    pub async fn delete_rule(&self, id: &str) -> Result<AlertRule, RuleError> {
        let deleted = self
            .store
            .delete_rule(id)
            .await?
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;
        self.invalidate_metric(&deleted.metric);
        tracing::info!(rule_id = %id, "Alert rule deleted");
        Ok(deleted)
    }

    pub async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>, StorageError> {
        self.store.get_rule(id).await
    }

    pub async fn list_rules(
        &self,
        filter: &RuleFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertRule>, StorageError> {
        self.store.list_rules(filter, limit, offset).await
    }

    pub async fn count_rules(&self, filter: &RuleFilter) -> Result<u64, StorageError> {
        self.store.count_rules(filter).await
    }
}
