//! Sample evaluation and the alert state machine.

use crate::analysis::AnalysisPipeline;
use crate::queue::{QueueStats, TaskQueue};
use crate::repository::RuleRepository;
use crate::state::{ensure_transition, AlertActionError, InvalidStateError};
use chrono::{DateTime, Duration, Utc};
use oxpulse_common::types::{
    fingerprint, format_labels, Alert, AlertRule, AlertStatus, MetricSample,
};
use oxpulse_notify::{Dispatcher, Notification, NotificationKind};
use oxpulse_storage::{AlertFilter, AlertStats, AlertStore, InsertOutcome, StorageError, Transition};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Pending breaches with no sample for this long are forgotten.
const PENDING_IDLE_LIMIT_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy)]
struct PendingBreach {
    first: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct EvaluatorConfig {
    /// Absolute tolerance for `==`/`!=` rules. `None` compares exactly.
    pub equality_tolerance: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("invalid sample: {0}")]
    InvalidSample(String),

    #[error("failed to load rules: {0}")]
    Rules(#[from] StorageError),
}

/// Per-sample evaluation summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvalOutcome {
    pub matched_rules: usize,
    pub fired: usize,
    pub refreshed: usize,
    pub resolved: usize,
    /// Breaching rules still waiting out their minimum duration.
    pub pending: usize,
    /// Rules whose evaluation failed and was skipped.
    pub failed: usize,
}

enum RuleAction {
    Fired,
    Refreshed,
    Resolved,
    Pending,
    Idle,
}

impl EvalOutcome {
    fn record(&mut self, action: RuleAction) {
        match action {
            RuleAction::Fired => self.fired += 1,
            RuleAction::Refreshed => self.refreshed += 1,
            RuleAction::Resolved => self.resolved += 1,
            RuleAction::Pending => self.pending += 1,
            RuleAction::Idle => {}
        }
    }
}

pub struct AlertEvaluator {
    rules: Arc<RuleRepository>,
    alerts: Arc<dyn AlertStore>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<TaskQueue>,
    analysis: Option<Arc<AnalysisPipeline>>,
    /// First breach time per fingerprint for rules with a minimum duration.
    pending: Mutex<HashMap<String, PendingBreach>>,
    config: EvaluatorConfig,
}

impl AlertEvaluator {
    pub fn new(
        rules: Arc<RuleRepository>,
        alerts: Arc<dyn AlertStore>,
        dispatcher: Arc<Dispatcher>,
        queue: Arc<TaskQueue>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            rules,
            alerts,
            dispatcher,
            queue,
            analysis: None,
            pending: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn with_analysis(mut self, pipeline: Arc<AnalysisPipeline>) -> Self {
        self.analysis = Some(pipeline);
        self
    }

    pub fn rules(&self) -> &RuleRepository {
        &self.rules
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Evaluates one sample against every matching rule.
    ///
    /// Returns once alert state is updated; notifications and analyses are
    /// queued. A failing rule is logged and counted, never fatal.
    pub async fn process_sample(&self, sample: &MetricSample) -> Result<EvalOutcome, EvalError> {
        if sample.metric_name.trim().is_empty() {
            return Err(EvalError::InvalidSample("metric_name is empty".into()));
        }
        if sample.target_id.trim().is_empty() {
            return Err(EvalError::InvalidSample("target_id is empty".into()));
        }
        if !sample.value.is_finite() {
            return Err(EvalError::InvalidSample(format!(
                "value {} is not finite",
                sample.value
            )));
        }

        let rules = self.rules.rules_for_metric(&sample.metric_name).await?;
        let mut outcome = EvalOutcome::default();

        for rule in rules.iter().filter(|r| r.matches(sample)) {
            outcome.matched_rules += 1;
            match self.evaluate_rule(rule, sample).await {
                Ok(action) => outcome.record(action),
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        rule_id = %rule.id,
                        target_id = %sample.target_id,
                        error = %e,
                        "Rule evaluation failed, skipping"
                    );
                }
            }
        }
        Ok(outcome)
    }

    async fn evaluate_rule(
        &self,
        rule: &AlertRule,
        sample: &MetricSample,
    ) -> Result<RuleAction, StorageError> {
        let fp = fingerprint(&rule.id, &sample.target_id, &sample.metric_name);
        let breached = rule.operator.check_with_tolerance(
            sample.value,
            rule.threshold,
            self.config.equality_tolerance,
        );
        let open = self.alerts.find_open_alert(&fp).await?;

        if !breached {
            self.clear_pending(&fp);
            let Some(open) = open else {
                return Ok(RuleAction::Idle);
            };
            return self.auto_resolve(rule, open, sample).await;
        }

        if let Some(open) = open {
            self.clear_pending(&fp);
            self.alerts
                .refresh_open_alert(&open.id, sample.value, &sample.labels, sample.timestamp)
                .await?;
            tracing::debug!(alert_id = %open.id, value = sample.value, "Open alert refreshed");
            return Ok(RuleAction::Refreshed);
        }

        if !self.duration_elapsed(rule, &fp, sample.timestamp) {
            return Ok(RuleAction::Pending);
        }

        let alert = build_alert(rule, sample, fp.clone());
        match self.alerts.insert_open_alert(&alert).await? {
            InsertOutcome::Created(alert) => {
                self.clear_pending(&fp);
                tracing::info!(
                    alert_id = %alert.id,
                    rule_id = %rule.id,
                    target_id = %alert.target_id,
                    severity = %alert.severity,
                    value = alert.value,
                    "Alert fired"
                );
                let notification = firing_notification(rule, &alert);
                self.enqueue_notification(notification, rule.channels.clone()).await;
                self.enqueue_analysis(rule, &alert).await;
                Ok(RuleAction::Fired)
            }
            InsertOutcome::Existing(existing) => {
                self.clear_pending(&fp);
                self.alerts
                    .refresh_open_alert(&existing.id, sample.value, &sample.labels, sample.timestamp)
                    .await?;
                tracing::debug!(alert_id = %existing.id, "Concurrent insert lost, refreshed existing alert");
                Ok(RuleAction::Refreshed)
            }
        }
    }

    async fn auto_resolve(
        &self,
        rule: &AlertRule,
        open: Alert,
        sample: &MetricSample,
    ) -> Result<RuleAction, StorageError> {
        let transition = Transition {
            to: AlertStatus::Resolved,
            actor: None,
            at: sample.timestamp,
        };
        match self.alerts.transition_alert(&open.id, &transition).await? {
            Some(resolved) => {
                tracing::info!(
                    alert_id = %resolved.id,
                    rule_id = %rule.id,
                    target_id = %resolved.target_id,
                    value = sample.value,
                    "Alert resolved"
                );
                let content = format!(
                    "{} on {} recovered: value {:.2} is no longer {} {:.2}",
                    resolved.metric_name,
                    resolved.target_id,
                    sample.value,
                    rule.operator.describe(),
                    rule.threshold,
                );
                let notification = resolved_notification(rule, &resolved, content);
                self.enqueue_notification(notification, rule.channels.clone()).await;
                Ok(RuleAction::Resolved)
            }
            None => {
                tracing::debug!(alert_id = %open.id, "Alert already resolved elsewhere");
                Ok(RuleAction::Idle)
            }
        }
    }

    /// Whether a breaching rule has held long enough to fire. Rules without
    /// a minimum duration fire immediately.
    fn duration_elapsed(&self, rule: &AlertRule, fp: &str, at: DateTime<Utc>) -> bool {
        if rule.duration_secs == 0 {
            return true;
        }
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if !pending.contains_key(fp) {
            // Targets that stopped reporting and deleted rules leave entries behind.
            let idle_limit = Duration::seconds(PENDING_IDLE_LIMIT_SECS);
            pending.retain(|_, breach| at - breach.last_seen <= idle_limit);
        }
        let breach = pending.entry(fp.to_string()).or_insert(PendingBreach {
            first: at,
            last_seen: at,
        });
        breach.last_seen = breach.last_seen.max(at);
        let first = breach.first;
        let required = Duration::seconds(i64::try_from(rule.duration_secs).unwrap_or(i64::MAX));
        let held = at - first;
        if held >= required {
            true
        } else {
            tracing::debug!(
                rule_id = %rule.id,
                held_secs = held.num_seconds(),
                required_secs = rule.duration_secs,
                "Breach pending minimum duration"
            );
            false
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn clear_pending(&self, fp: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(fp);
    }

    async fn enqueue_notification(&self, notification: Notification, channels: Vec<String>) {
        if channels.is_empty() {
            tracing::debug!(alert_id = ?notification.alert_id, "Rule has no channels, nothing to notify");
            return;
        }
        let dispatcher = Arc::clone(&self.dispatcher);
        let submitted = self
            .queue
            .submit(async move {
                if let Err(e) = dispatcher.send(&notification, &channels).await {
                    tracing::warn!(
                        alert_id = ?notification.alert_id,
                        kind = notification.kind.as_str(),
                        error = %e,
                        "Notification partially failed"
                    );
                }
            })
            .await;
        if let Err(e) = submitted {
            tracing::error!(error = %e, "Notification not queued");
        }
    }

    async fn enqueue_analysis(&self, rule: &AlertRule, alert: &Alert) {
        let Some(pipeline) = self.analysis.clone() else {
            return;
        };
        let rule = rule.clone();
        let alert = alert.clone();
        if let Err(e) = self
            .queue
            .submit(async move {
                pipeline.run(&rule, &alert).await;
            })
            .await
        {
            tracing::warn!(error = %e, "Analysis not queued");
        }
    }

    /// Operator acknowledgement. Legal only while firing.
    pub async fn acknowledge(&self, alert_id: &str, user_id: &str) -> Result<Alert, AlertActionError> {
        let alert = self.operator_transition(alert_id, user_id, AlertStatus::Acknowledged).await?;
        tracing::info!(alert_id, user_id, "Alert acknowledged");
        Ok(alert)
    }

    /// Operator resolution. Legal from firing or acknowledged; a resolved
    /// notification is sent to the rule's channels.
    pub async fn resolve(&self, alert_id: &str, user_id: &str) -> Result<Alert, AlertActionError> {
        let alert = self.operator_transition(alert_id, user_id, AlertStatus::Resolved).await?;
        tracing::info!(alert_id, user_id, "Alert resolved by operator");

        match self.rules.get_rule(&alert.rule_id).await {
            Ok(Some(rule)) => {
                let content = format!(
                    "{} on {} was resolved by {user_id}",
                    alert.metric_name, alert.target_id
                );
                let notification = resolved_notification(&rule, &alert, content);
                self.enqueue_notification(notification, rule.channels.clone()).await;
            }
            Ok(None) => {
                tracing::debug!(rule_id = %alert.rule_id, "Rule gone, no resolved notification");
            }
            Err(e) => {
                tracing::warn!(rule_id = %alert.rule_id, error = %e, "Failed to load rule for notification");
            }
        }
        Ok(alert)
    }

    async fn operator_transition(
        &self,
        alert_id: &str,
        user_id: &str,
        to: AlertStatus,
    ) -> Result<Alert, AlertActionError> {
        let current = self
            .alerts
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| AlertActionError::NotFound(alert_id.to_string()))?;
        ensure_transition(&current, to)?;

        let transition = Transition {
            to,
            actor: Some(user_id.to_string()),
            at: Utc::now(),
        };
        if let Some(updated) = self.alerts.transition_alert(alert_id, &transition).await? {
            return Ok(updated);
        }

        // Lost a race: report against the status that won.
        let latest = self
            .alerts
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| AlertActionError::NotFound(alert_id.to_string()))?;
        Err(AlertActionError::InvalidState(InvalidStateError {
            alert_id: alert_id.to_string(),
            from: latest.status,
            to,
        }))
    }

    pub async fn get_alert(&self, alert_id: &str) -> Result<Option<Alert>, StorageError> {
        self.alerts.get_alert(alert_id).await
    }

    pub async fn list_alerts(
        &self,
        filter: &AlertFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Alert>, StorageError> {
        self.alerts.list_alerts(filter, limit, offset).await
    }

    pub async fn count_alerts(&self, filter: &AlertFilter) -> Result<u64, StorageError> {
        self.alerts.count_alerts(filter).await
    }

    /// Counts by status, severity and day for alerts started in the last
    /// `days` days.
    pub async fn stats(&self, days: u32) -> Result<AlertStats, StorageError> {
        let since = Utc::now() - Duration::days(i64::from(days.max(1)));
        self.alerts.alert_stats(since).await
    }
}

fn build_alert(rule: &AlertRule, sample: &MetricSample, fingerprint: String) -> Alert {
    let mut labels = rule.labels.clone();
    labels.extend(sample.labels.clone());

    let labels_str = format_labels(&sample.labels);
    let labels_display = if labels_str.is_empty() {
        String::new()
    } else {
        format!(" [{labels_str}]")
    };
    let message = format!(
        "{}{} is {:.2}, {} threshold {:.2} on {}",
        sample.metric_name,
        labels_display,
        sample.value,
        rule.operator.describe(),
        rule.threshold,
        sample.target_id,
    );

    let now = Utc::now();
    Alert {
        id: oxpulse_common::id::next_id(),
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        fingerprint,
        target_type: sample.target_type.clone(),
        target_id: sample.target_id.clone(),
        metric_name: sample.metric_name.clone(),
        severity: rule.severity,
        status: AlertStatus::Firing,
        value: sample.value,
        threshold: rule.threshold,
        message,
        labels,
        started_at: sample.timestamp,
        last_seen_at: sample.timestamp,
        acknowledged_at: None,
        acknowledged_by: None,
        resolved_at: None,
        resolved_by: None,
        created_at: now,
        updated_at: now,
    }
}

fn firing_notification(rule: &AlertRule, alert: &Alert) -> Notification {
    let mut n = Notification::new(
        format!("{} on {}", rule.name, alert.target_id),
        alert.message.clone(),
        alert.severity,
    );
    n.labels = alert.labels.clone();
    n.alert_id = Some(alert.id.clone());
    n.timestamp = alert.started_at;
    n
}

fn resolved_notification(rule: &AlertRule, alert: &Alert, content: String) -> Notification {
    let mut n = Notification::new(
        format!("{} on {}", rule.name, alert.target_id),
        content,
        alert.severity,
    );
    n.kind = NotificationKind::Resolved;
    n.labels = alert.labels.clone();
    n.alert_id = Some(alert.id.clone());
    n.timestamp = alert.resolved_at.unwrap_or_else(Utc::now);
    n
}
