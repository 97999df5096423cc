use crate::channels::slack::SlackChannel;
use crate::channels::webhook::WebhookChannel;
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::error::{NotifyError, Result};
use crate::plugin::{ChannelPlugin, ChannelRegistry, PluginContext};
use crate::{Notification, NotificationChannel, NotificationKind};
use async_trait::async_trait;
use chrono::Utc;
use oxpulse_common::channel::{
    ChannelConfig, ChannelDefinition, ChannelType, SlackConfig, WebhookConfig, SECRET_MASK,
};
use oxpulse_common::types::{AttemptStatus, Severity};
use oxpulse_storage::{AttemptFilter, AttemptStore, ChannelStore, MemoryStore};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Scripted channel: behaviour is picked by the webhook URL path ──

struct ScriptedChannel {
    name: String,
    mode: String,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl NotificationChannel for ScriptedChannel {
    async fn send(&self, _notification: &Notification) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode.as_str() {
            "ok" => Ok(()),
            "fail" => Err(NotifyError::Api {
                service: "scripted".into(),
                status: 400,
                body: "rejected".into(),
            }),
            "flaky" if call == 0 => Err(NotifyError::Api {
                service: "scripted".into(),
                status: 503,
                body: "try again".into(),
            }),
            "flaky" => Ok(()),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
            other => Err(NotifyError::Other(format!("unknown mode {other}"))),
        }
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Webhook
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct ScriptedPlugin {
    calls: Arc<AtomicU32>,
}

impl ChannelPlugin for ScriptedPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Webhook
    }

    fn create_channel(
        &self,
        name: &str,
        config: &ChannelConfig,
        _ctx: &PluginContext,
    ) -> Result<Arc<dyn NotificationChannel>> {
        let ChannelConfig::Webhook(cfg) = config else {
            return Err(NotifyError::InvalidConfig("not a webhook".into()));
        };
        let mode = cfg.url.rsplit('/').next().unwrap_or_default().to_string();
        Ok(Arc::new(ScriptedChannel {
            name: name.to_string(),
            mode,
            calls: Arc::clone(&self.calls),
        }))
    }
}

fn webhook_def(name: &str, mode: &str, enabled: bool) -> ChannelDefinition {
    let now = Utc::now();
    ChannelDefinition {
        id: oxpulse_common::id::next_id(),
        name: name.to_string(),
        description: None,
        enabled,
        config: ChannelConfig::Webhook(WebhookConfig {
            url: format!("https://hooks.example.com/{mode}"),
            method: "POST".into(),
            headers: BTreeMap::new(),
            timeout: None,
        }),
        created_at: now,
        updated_at: now,
    }
}

async fn setup(defs: &[ChannelDefinition]) -> (Arc<MemoryStore>, Dispatcher, Arc<AtomicU32>) {
    let store = Arc::new(MemoryStore::new());
    for def in defs {
        store.insert_channel(def).await.unwrap();
    }
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = ChannelRegistry::default();
    registry.register(Box::new(ScriptedPlugin {
        calls: Arc::clone(&calls),
    }));
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(registry),
        DispatcherConfig {
            timeout: Duration::from_millis(500),
            max_retries: 2,
            backoff: Duration::from_millis(1),
        },
    );
    (store, dispatcher, calls)
}

fn alert_notification() -> Notification {
    let mut n = Notification::new("cpu high on host-1", "cpu.usage is 95 (> 90)", Severity::Critical);
    n.alert_id = Some("alert-1".into());
    n
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ── Registry ──

#[test]
fn registry_default_has_all_builtin_plugins() {
    let registry = ChannelRegistry::default();
    assert_eq!(
        registry.channel_types(),
        vec![
            ChannelType::DingTalk,
            ChannelType::Email,
            ChannelType::Slack,
            ChannelType::Webhook
        ]
    );
}

#[test]
fn registry_validates_before_save() {
    let registry = ChannelRegistry::default();
    assert!(matches!(
        registry.validate("pager", &json!({})),
        Err(NotifyError::UnknownChannelType(_))
    ));
    assert!(matches!(
        registry.validate("slack", &json!({"channel": "#ops"})),
        Err(NotifyError::InvalidConfig(_))
    ));
    let cfg = registry
        .validate(
            "dingtalk",
            &json!({"webhook_url": "https://oapi.dingtalk.com/robot/send", "secret": "SECx"}),
        )
        .unwrap();
    assert_eq!(cfg.redacted()["secret"], SECRET_MASK);
}

#[test]
fn registry_builds_every_builtin_type() {
    let registry = ChannelRegistry::default();
    let now = Utc::now();
    let configs = [
        json!({"url": "https://hooks.example.com/x", "method": "PUT", "headers": {"X-Token": "t"}}),
        json!({"webhook_url": "https://hooks.slack.com/services/T/B/X"}),
        json!({"webhook_url": "https://oapi.dingtalk.com/robot/send?access_token=t"}),
    ];
    for (ty, cfg) in ["webhook", "slack", "dingtalk"].iter().zip(configs) {
        let def = ChannelDefinition {
            id: "1".into(),
            name: format!("{ty}-channel"),
            description: None,
            enabled: true,
            config: registry.validate(ty, &cfg).unwrap(),
            created_at: now,
            updated_at: now,
        };
        let channel = registry.create_channel(&def).unwrap();
        assert_eq!(channel.channel_type().as_str(), *ty);
        assert_eq!(channel.name(), def.name);
    }
}

// ── Payloads ──

#[test]
fn webhook_body_is_generic_json() {
    let mut n = alert_notification();
    n.kind = NotificationKind::Resolved;
    n.labels.insert("region".into(), "eu".into());
    let body = WebhookChannel::render_body(&n);
    assert_eq!(body["title"], "cpu high on host-1");
    assert_eq!(body["severity"], "critical");
    assert_eq!(body["status"], "resolved");
    assert_eq!(body["labels"]["region"], "eu");
    assert_eq!(body["alert_id"], "alert-1");
}

#[test]
fn webhook_timeout_override_comes_from_config() {
    let ch = WebhookChannel::new(
        "hook",
        reqwest::Client::new(),
        WebhookConfig {
            url: "https://hooks.example.com/x".into(),
            method: "patch".into(),
            headers: BTreeMap::new(),
            timeout: Some(3),
        },
    )
    .unwrap();
    assert_eq!(ch.timeout_override(), Some(Duration::from_secs(3)));
}

#[test]
fn slack_attachment_uses_severity_color() {
    let ch = SlackChannel::new(
        "ops-slack",
        reqwest::Client::new(),
        SlackConfig {
            webhook_url: "https://hooks.slack.com/services/T/B/X".into(),
            channel: Some("#ops".into()),
            username: Some("oxpulse".into()),
            icon: Some(":rotating_light:".into()),
        },
    );
    let payload = ch.build_payload(&alert_notification());
    assert_eq!(payload["channel"], "#ops");
    assert_eq!(payload["icon_emoji"], ":rotating_light:");
    assert!(payload.get("icon_url").is_none());
    let attachment = &payload["attachments"][0];
    assert_eq!(attachment["color"], crate::color::SeverityColor::Red.hex());
    assert_eq!(attachment["text"], "cpu.usage is 95 (> 90)");
    assert_eq!(attachment["fields"][0]["value"], "critical");
}

#[test]
fn resolved_subject_is_tagged() {
    let mut n = alert_notification();
    assert_eq!(n.subject(), "[oxpulse][critical] cpu high on host-1");
    n.kind = NotificationKind::Resolved;
    assert_eq!(n.subject(), "[oxpulse][critical] [RESOLVED] cpu high on host-1");
}

// ── Dispatcher ──

#[tokio::test]
async fn dispatch_aggregates_partial_failure() {
    let defs = [
        webhook_def("a", "ok", true),
        webhook_def("b", "fail", true),
        webhook_def("c", "ok", true),
    ];
    let (store, dispatcher, _) = setup(&defs).await;

    let err = dispatcher
        .send(&alert_notification(), &names(&["a", "b", "c"]))
        .await
        .unwrap_err();
    assert_eq!(err.report.sent.len(), 2);
    assert_eq!(err.report.failed.len(), 1);
    assert_eq!(err.report.failed[0].channel, "b");
    assert!(err.to_string().contains("1 of 3"));

    let attempts = store
        .list_attempts(&AttemptFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| a.alert_id.as_deref() == Some("alert-1")));
    let failed: Vec<_> = attempts
        .iter()
        .filter(|a| a.status == AttemptStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.as_deref().unwrap().contains("rejected"));
    assert_eq!(
        attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Sent && a.sent_at.is_some())
            .count(),
        2
    );
}

#[tokio::test]
async fn unknown_and_disabled_channels_are_skipped() {
    let defs = [webhook_def("a", "ok", true), webhook_def("off", "ok", false)];
    let (store, dispatcher, _) = setup(&defs).await;

    let report = dispatcher
        .send(&alert_notification(), &names(&["a", "off", "ghost", "a"]))
        .await
        .unwrap();
    assert_eq!(report.sent, vec!["a".to_string()]);
    assert_eq!(report.skipped.len(), 2);
    assert!(report
        .skipped
        .iter()
        .any(|s| s.channel == "ghost" && s.reason == "unknown channel"));
    assert!(report
        .skipped
        .iter()
        .any(|s| s.channel == "off" && s.reason == "channel disabled"));
    assert_eq!(store.count_attempts(&AttemptFilter::default()).await.unwrap(), 1);
}

#[tokio::test]
async fn retryable_failures_are_retried() {
    let (_, dispatcher, calls) = setup(&[webhook_def("flaky", "flaky", true)]).await;
    let report = dispatcher
        .send(&alert_notification(), &names(&["flaky"]))
        .await
        .unwrap();
    assert_eq!(report.sent, vec!["flaky".to_string()]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let (_, dispatcher, calls) = setup(&[webhook_def("b", "fail", true)]).await;
    dispatcher
        .send(&alert_notification(), &names(&["b"]))
        .await
        .unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_channel_is_bounded_by_timeout() {
    let defs = [webhook_def("slow", "slow", true), webhook_def("fast", "ok", true)];
    let (store, dispatcher, _) = setup(&defs).await;

    let started = std::time::Instant::now();
    let err = dispatcher
        .send(&alert_notification(), &names(&["slow", "fast"]))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(err.report.sent, vec!["fast".to_string()]);
    assert!(err.report.failed[0].error.contains("timed out"));

    let failed = store
        .list_attempts(
            &AttemptFilter {
                status: Some(AttemptStatus::Failed),
                ..Default::default()
            },
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].channel, "slow");
}

#[tokio::test]
async fn no_channels_is_a_successful_noop() {
    let (_, dispatcher, _) = setup(&[]).await;
    let report = dispatcher.send(&alert_notification(), &[]).await.unwrap();
    assert_eq!(report.attempted(), 0);
}
