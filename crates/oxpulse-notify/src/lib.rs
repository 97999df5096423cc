//! Notification delivery framework with pluggable channel support.
//!
//! A [`Notification`] is a channel-agnostic payload. The
//! [`dispatcher::Dispatcher`] resolves channel names to stored
//! definitions, instantiates adapters through the [`plugin::ChannelRegistry`]
//! and fans the payload out concurrently. Built-in adapters cover email
//! (SMTP), generic webhooks, Slack and DingTalk.

pub mod channels;
pub mod color;
pub mod dispatcher;
pub mod error;
pub mod plugin;
pub mod utils;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxpulse_common::channel::ChannelType;
use oxpulse_common::types::{Labels, Severity};
use serde::Serialize;
use std::time::Duration;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{AggregateError, DispatchReport, NotifyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Firing,
    Resolved,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

/// Generic payload handed to every channel adapter.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub title: String,
    pub content: String,
    pub severity: Severity,
    pub labels: Labels,
    pub kind: NotificationKind,
    /// Alert this notification is about, if any. Recorded on each attempt.
    pub alert_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(title: impl Into<String>, content: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            severity,
            labels: Labels::new(),
            kind: NotificationKind::Firing,
            alert_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Subject line with a `[severity]` prefix and a `[RESOLVED]` tag when
    /// applicable.
    pub fn subject(&self) -> String {
        let tag = match self.kind {
            NotificationKind::Firing => "",
            NotificationKind::Resolved => "[RESOLVED] ",
        };
        format!("[oxpulse][{}] {tag}{}", self.severity, self.title)
    }
}

/// A delivery channel that sends notifications to an external service.
///
/// Implementations perform exactly one delivery attempt per call; retries and
/// time budgets are applied by the dispatcher.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers the notification.
    ///
    /// # Errors
    ///
    /// Returns a typed error for transport failures, non-2xx responses and
    /// provider-level rejections.
    async fn send(&self, notification: &Notification) -> error::Result<()>;

    fn channel_type(&self) -> ChannelType;

    /// Name of the stored channel this instance was built from.
    fn name(&self) -> &str;

    /// Per-channel time budget overriding the dispatcher default.
    fn timeout_override(&self) -> Option<Duration> {
        None
    }
}
