use crate::channels::read_success_body;
use crate::color::SeverityColor;
use crate::error::Result;
use crate::plugin::{wrong_variant, ChannelPlugin, PluginContext};
use crate::{Notification, NotificationChannel};
use async_trait::async_trait;
use oxpulse_common::channel::{ChannelConfig, ChannelType, SlackConfig};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub struct SlackChannel {
    name: String,
    client: reqwest::Client,
    config: SlackConfig,
}

impl SlackChannel {
    pub fn new(name: &str, client: reqwest::Client, config: SlackConfig) -> Self {
        Self {
            name: name.to_string(),
            client,
            config,
        }
    }

    /// Incoming-webhook payload: one attachment with a severity-coloured bar.
    pub fn build_payload(&self, notification: &Notification) -> Value {
        let mut fields = vec![
            json!({"title": "Severity", "value": notification.severity.as_str(), "short": true}),
            json!({"title": "Status", "value": notification.kind.as_str(), "short": true}),
        ];
        for (k, v) in &notification.labels {
            fields.push(json!({"title": k, "value": v, "short": true}));
        }

        let mut payload = Map::new();
        if let Some(ref channel) = self.config.channel {
            payload.insert("channel".into(), json!(channel));
        }
        if let Some(ref username) = self.config.username {
            payload.insert("username".into(), json!(username));
        }
        if let Some(ref icon) = self.config.icon {
            let key = if icon.starts_with(':') {
                "icon_emoji"
            } else {
                "icon_url"
            };
            payload.insert(key.into(), json!(icon));
        }
        payload.insert(
            "attachments".into(),
            json!([{
                "color": SeverityColor::for_severity(notification.severity).hex(),
                "title": notification.subject(),
                "text": notification.content,
                "fields": fields,
                "ts": notification.timestamp.timestamp(),
            }]),
        );
        Value::Object(payload)
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let resp = self
            .client
            .post(&self.config.webhook_url)
            .json(&self.build_payload(notification))
            .send()
            .await?;
        read_success_body("slack", resp).await?;
        Ok(())
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Slack
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct SlackPlugin;

impl ChannelPlugin for SlackPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Slack
    }

    fn create_channel(
        &self,
        name: &str,
        config: &ChannelConfig,
        ctx: &PluginContext,
    ) -> Result<Arc<dyn NotificationChannel>> {
        match config {
            ChannelConfig::Slack(cfg) => Ok(Arc::new(SlackChannel::new(
                name,
                ctx.http.clone(),
                cfg.clone(),
            ))),
            other => Err(wrong_variant(ChannelType::Slack, other)),
        }
    }
}
