//! In-process repository used by tests and single-node embedded setups.
//!
//! State lives behind one mutex, so every method observes and mutates a
//! consistent snapshot; the open-alert and name uniqueness checks are
//! therefore atomic with the write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxpulse_common::channel::ChannelDefinition;
use oxpulse_common::types::{
    Alert, AlertRule, AnalysisResult, AttemptStatus, Labels, NotificationAttempt,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, StorageError};
use crate::{
    AlertFilter, AlertStats, AlertStore, AnalysisFilter, AnalysisStore, AttemptFilter,
    AttemptStore, ChannelStore, InsertOutcome, RuleFilter, RuleStore, Transition,
};

#[derive(Default)]
struct Inner {
    // (rule, deleted)
    rules: HashMap<String, (AlertRule, bool)>,
    alerts: HashMap<String, Alert>,
    channels: HashMap<String, ChannelDefinition>,
    attempts: Vec<NotificationAttempt>,
    analyses: Vec<AnalysisResult>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn page<T: Clone>(items: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}

impl Inner {
    fn live_rules(&self) -> impl Iterator<Item = &AlertRule> {
        self.rules.values().filter(|(_, deleted)| !deleted).map(|(r, _)| r)
    }

    fn name_taken(&self, name: &str, except_id: &str) -> bool {
        self.live_rules().any(|r| r.name == name && r.id != except_id)
    }

    fn open_alert(&self, fingerprint: &str) -> Option<&Alert> {
        self.alerts
            .values()
            .find(|a| a.fingerprint == fingerprint && a.status.is_open())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn insert_rule(&self, rule: &AlertRule) -> Result<AlertRule> {
        let mut inner = self.lock();
        if inner.name_taken(&rule.name, "") || inner.rules.contains_key(&rule.id) {
            return Err(StorageError::Conflict {
                entity: "alert_rule",
                key: rule.name.clone(),
            });
        }
        inner.rules.insert(rule.id.clone(), (rule.clone(), false));
        Ok(rule.clone())
    }

    async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        let inner = self.lock();
        Ok(inner
            .rules
            .get(id)
            .filter(|(_, deleted)| !deleted)
            .map(|(r, _)| r.clone()))
    }

    async fn update_rule(&self, rule: &AlertRule) -> Result<Option<AlertRule>> {
        let mut inner = self.lock();
        if inner.name_taken(&rule.name, &rule.id) {
            return Err(StorageError::Conflict {
                entity: "alert_rule",
                key: rule.name.clone(),
            });
        }
        match inner.rules.get_mut(&rule.id) {
            Some((stored, false)) => {
                let created_at = stored.created_at;
                *stored = rule.clone();
                stored.created_at = created_at;
                Ok(Some(stored.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        let mut inner = self.lock();
        match inner.rules.get_mut(id) {
            Some((rule, deleted)) if !*deleted => {
                *deleted = true;
                Ok(Some(rule.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_rules(
        &self,
        filter: &RuleFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertRule>> {
        let inner = self.lock();
        let mut rules: Vec<AlertRule> =
            inner.live_rules().filter(|r| filter.matches(r)).cloned().collect();
        rules.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rules, limit, offset))
    }

    async fn count_rules(&self, filter: &RuleFilter) -> Result<u64> {
        let inner = self.lock();
        Ok(inner.live_rules().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn list_enabled_rules_for_metric(&self, metric: &str) -> Result<Vec<AlertRule>> {
        let inner = self.lock();
        let mut rules: Vec<AlertRule> = inner
            .live_rules()
            .filter(|r| r.enabled && r.metric == metric)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rules)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn find_open_alert(&self, fingerprint: &str) -> Result<Option<Alert>> {
        Ok(self.lock().open_alert(fingerprint).cloned())
    }

    async fn insert_open_alert(&self, alert: &Alert) -> Result<InsertOutcome> {
        let mut inner = self.lock();
        if let Some(existing) = inner.open_alert(&alert.fingerprint) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        inner.alerts.insert(alert.id.clone(), alert.clone());
        Ok(InsertOutcome::Created(alert.clone()))
    }

    async fn refresh_open_alert(
        &self,
        id: &str,
        value: f64,
        labels: &Labels,
        seen_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.lock();
        match inner.alerts.get_mut(id) {
            Some(alert) if alert.status.is_open() => {
                alert.value = value;
                alert
                    .labels
                    .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
                alert.last_seen_at = seen_at;
                alert.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_alert(&self, id: &str, t: &Transition) -> Result<Option<Alert>> {
        let mut inner = self.lock();
        match inner.alerts.get_mut(id) {
            Some(alert) if alert.status.can_transition_to(t.to) => {
                t.apply(alert);
                Ok(Some(alert.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn annotate_alert(&self, id: &str, labels: &Labels) -> Result<Option<Alert>> {
        let mut inner = self.lock();
        Ok(inner.alerts.get_mut(id).map(|alert| {
            alert
                .labels
                .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
            alert.updated_at = Utc::now();
            alert.clone()
        }))
    }

    async fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        Ok(self.lock().alerts.get(id).cloned())
    }

    async fn list_alerts(
        &self,
        filter: &AlertFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Alert>> {
        let inner = self.lock();
        let mut alerts: Vec<Alert> =
            inner.alerts.values().filter(|a| filter.matches(a)).cloned().collect();
        alerts.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(page(alerts, limit, offset))
    }

    async fn count_alerts(&self, filter: &AlertFilter) -> Result<u64> {
        let inner = self.lock();
        Ok(inner.alerts.values().filter(|a| filter.matches(a)).count() as u64)
    }

    async fn alert_stats(&self, since: DateTime<Utc>) -> Result<AlertStats> {
        let inner = self.lock();
        let mut stats = AlertStats::default();
        for alert in inner.alerts.values().filter(|a| a.started_at >= since) {
            stats.record(alert);
        }
        Ok(stats)
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn insert_channel(&self, channel: &ChannelDefinition) -> Result<ChannelDefinition> {
        let mut inner = self.lock();
        if inner.channels.values().any(|c| c.name == channel.name) {
            return Err(StorageError::Conflict {
                entity: "notification_channel",
                key: channel.name.clone(),
            });
        }
        inner.channels.insert(channel.id.clone(), channel.clone());
        Ok(channel.clone())
    }

    async fn get_channel(&self, id: &str) -> Result<Option<ChannelDefinition>> {
        Ok(self.lock().channels.get(id).cloned())
    }

    async fn get_channel_by_name(&self, name: &str) -> Result<Option<ChannelDefinition>> {
        Ok(self.lock().channels.values().find(|c| c.name == name).cloned())
    }

    async fn update_channel(
        &self,
        channel: &ChannelDefinition,
    ) -> Result<Option<ChannelDefinition>> {
        let mut inner = self.lock();
        if inner
            .channels
            .values()
            .any(|c| c.name == channel.name && c.id != channel.id)
        {
            return Err(StorageError::Conflict {
                entity: "notification_channel",
                key: channel.name.clone(),
            });
        }
        Ok(inner.channels.get_mut(&channel.id).map(|stored| {
            let created_at = stored.created_at;
            *stored = channel.clone();
            stored.created_at = created_at;
            stored.clone()
        }))
    }

    async fn delete_channel(&self, id: &str) -> Result<bool> {
        Ok(self.lock().channels.remove(id).is_some())
    }

    async fn list_channels(&self, limit: usize, offset: usize) -> Result<Vec<ChannelDefinition>> {
        let inner = self.lock();
        let mut channels: Vec<ChannelDefinition> = inner.channels.values().cloned().collect();
        channels.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(channels, limit, offset))
    }

    async fn count_channels(&self) -> Result<u64> {
        Ok(self.lock().channels.len() as u64)
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn insert_attempt(&self, attempt: &NotificationAttempt) -> Result<()> {
        self.lock().attempts.push(attempt.clone());
        Ok(())
    }

    async fn finish_attempt(
        &self,
        id: &str,
        status: AttemptStatus,
        error: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut inner = self.lock();
        match inner
            .attempts
            .iter_mut()
            .find(|a| a.id == id && a.status == AttemptStatus::Pending)
        {
            Some(attempt) => {
                attempt.status = status;
                attempt.error = error.map(str::to_string);
                attempt.sent_at = sent_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_attempts(
        &self,
        filter: &AttemptFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NotificationAttempt>> {
        let inner = self.lock();
        let attempts: Vec<NotificationAttempt> = inner
            .attempts
            .iter()
            .rev()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        Ok(page(attempts, limit, offset))
    }

    async fn count_attempts(&self, filter: &AttemptFilter) -> Result<u64> {
        let inner = self.lock();
        Ok(inner.attempts.iter().filter(|a| filter.matches(a)).count() as u64)
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn insert_analysis(&self, result: &AnalysisResult) -> Result<()> {
        let mut stored = result.clone();
        stored.confidence = stored.confidence.clamp(0.0, 1.0);
        self.lock().analyses.push(stored);
        Ok(())
    }

    async fn list_analyses(
        &self,
        filter: &AnalysisFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AnalysisResult>> {
        let inner = self.lock();
        let results: Vec<AnalysisResult> = inner
            .analyses
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(page(results, limit, offset))
    }

    async fn count_analyses(&self, filter: &AnalysisFilter) -> Result<u64> {
        let inner = self.lock();
        Ok(inner.analyses.iter().filter(|r| filter.matches(r)).count() as u64)
    }
}
