use crate::channels::read_success_body;
use crate::error::{NotifyError, Result};
use crate::plugin::{wrong_variant, ChannelPlugin, PluginContext};
use crate::{Notification, NotificationChannel};
use async_trait::async_trait;
use oxpulse_common::channel::{ChannelConfig, ChannelType, WebhookConfig};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct WebhookChannel {
    name: String,
    client: reqwest::Client,
    config: WebhookConfig,
    method: Method,
}

impl WebhookChannel {
    pub fn new(name: &str, client: reqwest::Client, config: WebhookConfig) -> Result<Self> {
        let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|e| NotifyError::InvalidConfig(format!("webhook method: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            client,
            config,
            method,
        })
    }

    pub fn render_body(notification: &Notification) -> Value {
        serde_json::json!({
            "title": notification.title,
            "content": notification.content,
            "severity": notification.severity,
            "labels": notification.labels,
            "status": notification.kind.as_str(),
            "timestamp": notification.timestamp.to_rfc3339(),
            "alert_id": notification.alert_id,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let mut request = self.client.request(self.method.clone(), &self.config.url);
        for (key, value) in &self.config.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(timeout) = self.timeout_override() {
            request = request.timeout(timeout);
        }
        request = if self.method == Method::GET {
            request.query(&[
                ("title", notification.title.as_str()),
                ("severity", notification.severity.as_str()),
                ("status", notification.kind.as_str()),
                ("alert_id", notification.alert_id.as_deref().unwrap_or("")),
            ])
        } else {
            request.json(&Self::render_body(notification))
        };

        let resp = request.send().await?;
        read_success_body("webhook", resp).await?;
        tracing::debug!(channel = %self.name, url = %self.config.url, "Webhook delivered");
        Ok(())
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Webhook
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn timeout_override(&self) -> Option<Duration> {
        self.config.timeout.map(Duration::from_secs)
    }
}

pub struct WebhookPlugin;

impl ChannelPlugin for WebhookPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Webhook
    }

    fn create_channel(
        &self,
        name: &str,
        config: &ChannelConfig,
        ctx: &PluginContext,
    ) -> Result<Arc<dyn NotificationChannel>> {
        match config {
            ChannelConfig::Webhook(cfg) => Ok(Arc::new(WebhookChannel::new(
                name,
                ctx.http.clone(),
                cfg.clone(),
            )?)),
            other => Err(wrong_variant(ChannelType::Webhook, other)),
        }
    }
}
