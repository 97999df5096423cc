//! Persistence layer for rules, alerts, notification channels, delivery
//! attempts and analysis results.
//!
//! Each aggregate has its own async repository trait so that callers can
//! depend on the narrowest surface they need. Two implementations ship with
//! the crate: [`store::Store`] (SeaORM over SQLite) and
//! [`memory::MemoryStore`] (in-process, used by tests and embedded setups).
//!
//! Both implementations enforce the same invariants:
//!
//! - at most one *open* alert exists per fingerprint; a losing concurrent
//!   insert observes [`InsertOutcome::Existing`] instead of an error,
//! - alert status changes are conditional writes that only apply when the
//!   stored status still permits the transition,
//! - rule names are unique among live (non-deleted) rules and channel names
//!   are unique.

pub mod entities;
pub mod error;
pub mod memory;
pub mod store;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxpulse_common::channel::ChannelDefinition;
use oxpulse_common::types::{
    Alert, AlertRule, AlertStatus, AnalysisResult, AttemptStatus, Labels, NotificationAttempt,
    Severity,
};
use serde::Serialize;
use std::collections::BTreeMap;

pub use error::{Result, StorageError};
pub use memory::MemoryStore;
pub use store::Store;

/// Filters for listing rules. Soft-deleted rules are never returned.
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub name_contains: Option<String>,
    pub metric_eq: Option<String>,
    pub severity_eq: Option<Severity>,
    pub enabled_eq: Option<bool>,
}

impl RuleFilter {
    pub fn matches(&self, rule: &AlertRule) -> bool {
        self.name_contains
            .as_deref()
            .map_or(true, |s| rule.name.contains(s))
            && self.metric_eq.as_deref().map_or(true, |m| rule.metric == m)
            && self.severity_eq.map_or(true, |s| rule.severity == s)
            && self.enabled_eq.map_or(true, |e| rule.enabled == e)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<Severity>,
    pub rule_id: Option<String>,
    pub target_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.status.map_or(true, |s| alert.status == s)
            && self.severity.map_or(true, |s| alert.severity == s)
            && self.rule_id.as_deref().map_or(true, |r| alert.rule_id == r)
            && self.target_id.as_deref().map_or(true, |t| alert.target_id == t)
            && self.since.map_or(true, |t| alert.started_at >= t)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttemptFilter {
    pub alert_id: Option<String>,
    pub channel: Option<String>,
    pub status: Option<AttemptStatus>,
}

impl AttemptFilter {
    pub fn matches(&self, attempt: &NotificationAttempt) -> bool {
        self.alert_id
            .as_deref()
            .map_or(true, |a| attempt.alert_id.as_deref() == Some(a))
            && self.channel.as_deref().map_or(true, |c| attempt.channel == c)
            && self.status.map_or(true, |s| attempt.status == s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisFilter {
    pub alert_id: Option<String>,
    pub target_id: Option<String>,
    pub metric_name: Option<String>,
    pub analysis_type: Option<String>,
}

impl AnalysisFilter {
    pub fn matches(&self, result: &AnalysisResult) -> bool {
        self.alert_id
            .as_deref()
            .map_or(true, |a| result.alert_id.as_deref() == Some(a))
            && self.target_id.as_deref().map_or(true, |t| result.target_id == t)
            && self
                .metric_name
                .as_deref()
                .map_or(true, |m| result.input.metric_name == m)
            && self
                .analysis_type
                .as_deref()
                .map_or(true, |t| result.analysis_type == t)
    }
}

/// Result of [`AlertStore::insert_open_alert`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The alert was written.
    Created(Alert),
    /// Another open alert with the same fingerprint already existed.
    Existing(Alert),
}

impl InsertOutcome {
    pub fn alert(&self) -> &Alert {
        match self {
            Self::Created(a) | Self::Existing(a) => a,
        }
    }

    pub fn into_alert(self) -> Alert {
        match self {
            Self::Created(a) | Self::Existing(a) => a,
        }
    }
}

/// A requested status change on an alert.
#[derive(Debug, Clone)]
pub struct Transition {
    pub to: AlertStatus,
    pub actor: Option<String>,
    pub at: DateTime<Utc>,
}

impl Transition {
    /// Statuses from which this transition is legal.
    pub fn allowed_from(&self) -> Vec<AlertStatus> {
        [AlertStatus::Firing, AlertStatus::Acknowledged, AlertStatus::Resolved]
            .into_iter()
            .filter(|s| s.can_transition_to(self.to))
            .collect()
    }

    /// Applies the transition to an in-memory alert without checking legality.
    pub fn apply(&self, alert: &mut Alert) {
        alert.status = self.to;
        alert.updated_at = self.at;
        match self.to {
            AlertStatus::Acknowledged => {
                alert.acknowledged_at = Some(self.at);
                alert.acknowledged_by = self.actor.clone();
            }
            AlertStatus::Resolved => {
                alert.resolved_at = Some(self.at);
                alert.resolved_by = self.actor.clone();
            }
            AlertStatus::Firing => {}
        }
    }
}

/// Aggregated alert counts over a time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    /// Keyed by UTC date, `YYYY-MM-DD`.
    pub by_day: BTreeMap<String, u64>,
}

impl AlertStats {
    pub fn record(&mut self, alert: &Alert) {
        self.total += 1;
        *self.by_status.entry(alert.status.to_string()).or_default() += 1;
        *self.by_severity.entry(alert.severity.to_string()).or_default() += 1;
        *self
            .by_day
            .entry(alert.started_at.format("%Y-%m-%d").to_string())
            .or_default() += 1;
    }
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Inserts a rule. Fails with [`StorageError::Conflict`] when a live rule
    /// already uses the same name.
    async fn insert_rule(&self, rule: &AlertRule) -> Result<AlertRule>;

    async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>>;

    /// Replaces a live rule's mutable fields. Returns `None` if the rule does
    /// not exist or was deleted.
    async fn update_rule(&self, rule: &AlertRule) -> Result<Option<AlertRule>>;

    /// Soft-deletes a rule and returns it as it was before deletion.
    async fn delete_rule(&self, id: &str) -> Result<Option<AlertRule>>;

    async fn list_rules(
        &self,
        filter: &RuleFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertRule>>;

    async fn count_rules(&self, filter: &RuleFilter) -> Result<u64>;

    /// Enabled, live rules watching `metric`, oldest first.
    async fn list_enabled_rules_for_metric(&self, metric: &str) -> Result<Vec<AlertRule>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn find_open_alert(&self, fingerprint: &str) -> Result<Option<Alert>>;

    /// Inserts `alert` unless an open alert with the same fingerprint exists,
    /// in which case the existing one is returned.
    async fn insert_open_alert(&self, alert: &Alert) -> Result<InsertOutcome>;

    /// Records a repeat observation on an open alert: latest value, merged
    /// labels and `last_seen_at`. Returns `false` when the alert is no longer
    /// open. Concurrent refreshes keep each other's label keys; for the
    /// value and `last_seen_at` the last writer wins.
    async fn refresh_open_alert(
        &self,
        id: &str,
        value: f64,
        labels: &Labels,
        seen_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Conditionally applies `transition`. Returns the updated alert, or
    /// `None` when the alert is missing or its current status does not permit
    /// the transition.
    async fn transition_alert(&self, id: &str, transition: &Transition) -> Result<Option<Alert>>;

    /// Merges `labels` into an alert's labels regardless of its status.
    async fn annotate_alert(&self, id: &str, labels: &Labels) -> Result<Option<Alert>>;

    async fn get_alert(&self, id: &str) -> Result<Option<Alert>>;

    async fn list_alerts(
        &self,
        filter: &AlertFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Alert>>;

    async fn count_alerts(&self, filter: &AlertFilter) -> Result<u64>;

    async fn alert_stats(&self, since: DateTime<Utc>) -> Result<AlertStats>;
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn insert_channel(&self, channel: &ChannelDefinition) -> Result<ChannelDefinition>;

    async fn get_channel(&self, id: &str) -> Result<Option<ChannelDefinition>>;

    async fn get_channel_by_name(&self, name: &str) -> Result<Option<ChannelDefinition>>;

    async fn update_channel(&self, channel: &ChannelDefinition)
        -> Result<Option<ChannelDefinition>>;

    async fn delete_channel(&self, id: &str) -> Result<bool>;

    async fn list_channels(&self, limit: usize, offset: usize) -> Result<Vec<ChannelDefinition>>;

    async fn count_channels(&self) -> Result<u64>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn insert_attempt(&self, attempt: &NotificationAttempt) -> Result<()>;

    /// Moves a pending attempt to its final status. Returns `false` if the
    /// attempt was not pending.
    async fn finish_attempt(
        &self,
        id: &str,
        status: AttemptStatus,
        error: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    async fn list_attempts(
        &self,
        filter: &AttemptFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NotificationAttempt>>;

    async fn count_attempts(&self, filter: &AttemptFilter) -> Result<u64>;
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn insert_analysis(&self, result: &AnalysisResult) -> Result<()>;

    async fn list_analyses(
        &self,
        filter: &AnalysisFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AnalysisResult>>;

    async fn count_analyses(&self, filter: &AnalysisFilter) -> Result<u64>;
}

/// Every repository the engine needs, behind one object.
pub trait Repository:
    RuleStore + AlertStore + ChannelStore + AttemptStore + AnalysisStore
{
}

impl<T> Repository for T where T: RuleStore + AlertStore + ChannelStore + AttemptStore + AnalysisStore
{}
