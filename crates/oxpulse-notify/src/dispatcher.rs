//! Concurrent fan-out of one notification to many named channels.

use crate::error::{
    AggregateError, ChannelFailure, DispatchReport, NotifyError, SkippedChannel,
};
use crate::plugin::ChannelRegistry;
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::{Notification, NotificationChannel};
use chrono::Utc;
use oxpulse_common::types::{AttemptStatus, NotificationAttempt};
use oxpulse_storage::{AttemptStore, ChannelStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Storage the dispatcher needs: channel lookup and attempt recording.
pub trait DispatchStore: ChannelStore + AttemptStore {}

impl<T> DispatchStore for T where T: ChannelStore + AttemptStore {}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Time budget per channel, retries included.
    pub timeout: Duration,
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// First backoff delay; doubles after every retry.
    pub backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            backoff: Duration::from_millis(100),
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn DispatchStore>,
    registry: Arc<ChannelRegistry>,
    config: DispatcherConfig,
}

enum Resolved {
    Ready(Arc<dyn NotificationChannel>),
    Broken { channel_type: String, error: String },
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        registry: Arc<ChannelRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Sends to every named channel and fails if any attempted channel
    /// failed. Successful sends are kept either way.
    pub async fn send(
        &self,
        notification: &Notification,
        channel_names: &[String],
    ) -> Result<DispatchReport, AggregateError> {
        let report = self.dispatch(notification, channel_names).await;
        if report.is_success() {
            Ok(report)
        } else {
            Err(AggregateError { report })
        }
    }

    /// Sends to every named channel concurrently and reports per-channel
    /// outcomes. Unknown and disabled channels are skipped, not attempted.
    pub async fn dispatch(
        &self,
        notification: &Notification,
        channel_names: &[String],
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut seen = HashSet::new();
        let mut handles = Vec::new();

        for name in channel_names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let resolved = match self.resolve(name).await {
                Ok(r) => r,
                Err(reason) => {
                    tracing::warn!(channel = %name, reason = %reason, "Skipping notification channel");
                    report.skipped.push(SkippedChannel {
                        channel: name.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let channel_type = match &resolved {
                Resolved::Ready(ch) => ch.channel_type().to_string(),
                Resolved::Broken { channel_type, .. } => channel_type.clone(),
            };
            let attempt = NotificationAttempt {
                id: oxpulse_common::id::next_id(),
                alert_id: notification.alert_id.clone(),
                channel: name.clone(),
                channel_type,
                status: AttemptStatus::Pending,
                error: None,
                sent_at: None,
                created_at: Utc::now(),
            };
            if let Err(e) = self.store.insert_attempt(&attempt).await {
                tracing::warn!(channel = %name, error = %e, "Failed to record notification attempt");
            }

            let store = Arc::clone(&self.store);
            let config = self.config.clone();
            let notification = notification.clone();
            let handle = tokio::spawn(async move {
                let outcome = match resolved {
                    Resolved::Ready(channel) => {
                        deliver_with_budget(channel.as_ref(), &notification, &config).await
                    }
                    Resolved::Broken { error, .. } => Err(NotifyError::InvalidConfig(error)),
                };
                finish(store.as_ref(), &attempt, &outcome).await;
                outcome
            });
            handles.push((name.clone(), handle));
        }

        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(NotifyError::Other(format!("delivery task failed: {e}"))),
            };
            match outcome {
                Ok(()) => report.sent.push(name),
                Err(e) => {
                    tracing::error!(channel = %name, error = %e, "Notification delivery failed");
                    report.failed.push(ChannelFailure {
                        channel: name,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            sent = report.sent.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            alert_id = notification.alert_id.as_deref().unwrap_or("-"),
            "Notification dispatched"
        );
        report
    }

    async fn resolve(&self, name: &str) -> Result<Resolved, String> {
        let def = match self.store.get_channel_by_name(name).await {
            Ok(Some(def)) => def,
            Ok(None) => return Err("unknown channel".to_string()),
            Err(e) => return Err(format!("channel lookup failed: {e}")),
        };
        if !def.enabled {
            return Err("channel disabled".to_string());
        }
        Ok(match self.registry.create_channel(&def) {
            Ok(channel) => Resolved::Ready(channel),
            Err(e) => Resolved::Broken {
                channel_type: def.channel_type().to_string(),
                error: e.to_string(),
            },
        })
    }
}

async fn deliver_with_budget(
    channel: &dyn NotificationChannel,
    notification: &Notification,
    config: &DispatcherConfig,
) -> Result<(), NotifyError> {
    let budget = channel.timeout_override().unwrap_or(config.timeout);
    match tokio::time::timeout(budget, deliver(channel, notification, config)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout {
            channel: channel.name().to_string(),
            secs: budget.as_secs(),
        }),
    }
}

async fn deliver(
    channel: &dyn NotificationChannel,
    notification: &Notification,
    config: &DispatcherConfig,
) -> Result<(), NotifyError> {
    let mut retry = 0u32;
    loop {
        match channel.send(notification).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && retry < config.max_retries => {
                tracing::warn!(
                    channel = channel.name(),
                    attempt = retry + 1,
                    error = %e,
                    "Notification send failed, retrying"
                );
                tokio::time::sleep(config.backoff * 2u32.saturating_pow(retry)).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn finish(
    store: &dyn DispatchStore,
    attempt: &NotificationAttempt,
    outcome: &Result<(), NotifyError>,
) {
    let result = match outcome {
        Ok(()) => {
            store
                .finish_attempt(&attempt.id, AttemptStatus::Sent, None, Some(Utc::now()))
                .await
        }
        Err(e) => {
            let error = truncate_string(&e.to_string(), MAX_BODY_LENGTH);
            store
                .finish_attempt(&attempt.id, AttemptStatus::Failed, Some(&error), None)
                .await
        }
    };
    if let Err(e) = result {
        tracing::warn!(attempt_id = %attempt.id, error = %e, "Failed to finalize notification attempt");
    }
}
