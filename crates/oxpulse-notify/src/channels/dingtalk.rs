use crate::channels::read_success_body;
use crate::error::{NotifyError, Result};
use crate::plugin::{wrong_variant, ChannelPlugin, PluginContext};
use crate::{Notification, NotificationChannel};
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use oxpulse_common::channel::{ChannelConfig, ChannelType, DingTalkConfig};
use oxpulse_common::types::format_labels;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

pub struct DingTalkChannel {
    name: String,
    client: reqwest::Client,
    config: DingTalkConfig,
}

impl DingTalkChannel {
    pub fn new(name: &str, client: reqwest::Client, config: DingTalkConfig) -> Self {
        Self {
            name: name.to_string(),
            client,
            config,
        }
    }

    /// Appends `timestamp` and `sign` when a secret is configured.
    pub fn sign_url(&self, base_url: &str, timestamp_ms: i64) -> Result<String> {
        let Some(secret) = &self.config.secret else {
            return Ok(base_url.to_string());
        };

        let string_to_sign = format!("{timestamp_ms}\n{secret}");
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| NotifyError::InvalidConfig(format!("dingtalk secret: {e}")))?;
        mac.update(string_to_sign.as_bytes());
        let sign = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        let sep = if base_url.contains('?') { '&' } else { '?' };

        Ok(format!(
            "{base_url}{sep}timestamp={timestamp_ms}&sign={}",
            urlencoding::encode(&sign)
        ))
    }

    /// `text` message; each configured mobile is mentioned at the end of
    /// the content so the robot actually pings it.
    pub fn build_payload(&self, notification: &Notification) -> Value {
        let mut content = format!("{}\n\n{}", notification.subject(), notification.content);
        if !notification.labels.is_empty() {
            content.push_str(&format!("\nLabels: {}", format_labels(&notification.labels)));
        }
        content.push_str(&format!("\nTime: {}", notification.timestamp.to_rfc3339()));
        if !self.config.at_mobiles.is_empty() {
            let mentions: Vec<String> =
                self.config.at_mobiles.iter().map(|m| format!("@{m}")).collect();
            content.push('\n');
            content.push_str(&mentions.join(" "));
        }

        serde_json::json!({
            "msgtype": "text",
            "text": { "content": content },
            "at": {
                "atMobiles": self.config.at_mobiles,
                "isAtAll": self.config.at_all,
            }
        })
    }
}

/// DingTalk reports failures as `errcode != 0` inside a 200 response.
fn check_errcode(body: &str) -> Result<()> {
    let parsed: Value = serde_json::from_str(body)?;
    match parsed.get("errcode").and_then(Value::as_i64) {
        Some(0) | None => Ok(()),
        Some(code) => {
            let errmsg = parsed
                .get("errmsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            Err(NotifyError::Api {
                service: "dingtalk".to_string(),
                status: 200,
                body: format!("errcode={code} errmsg={errmsg}"),
            })
        }
    }
}

#[async_trait]
impl NotificationChannel for DingTalkChannel {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let url = self.sign_url(
            &self.config.webhook_url,
            chrono::Utc::now().timestamp_millis(),
        )?;
        let resp = self
            .client
            .post(url)
            .json(&self.build_payload(notification))
            .send()
            .await?;
        let body = read_success_body("dingtalk", resp).await?;
        check_errcode(&body)
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::DingTalk
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct DingTalkPlugin;

impl ChannelPlugin for DingTalkPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::DingTalk
    }

    fn create_channel(
        &self,
        name: &str,
        config: &ChannelConfig,
        ctx: &PluginContext,
    ) -> Result<Arc<dyn NotificationChannel>> {
        match config {
            ChannelConfig::DingTalk(cfg) => Ok(Arc::new(DingTalkChannel::new(
                name,
                ctx.http.clone(),
                cfg.clone(),
            ))),
            other => Err(wrong_variant(ChannelType::DingTalk, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(secret: Option<&str>, mobiles: &[&str]) -> DingTalkChannel {
        DingTalkChannel::new(
            "ops-ding",
            reqwest::Client::new(),
            DingTalkConfig {
                webhook_url: "https://oapi.dingtalk.com/robot/send?access_token=t".into(),
                secret: secret.map(str::to_string),
                at_mobiles: mobiles.iter().map(|m| m.to_string()).collect(),
                at_all: false,
            },
        )
    }

    #[test]
    fn unsigned_url_is_unchanged() {
        let ch = channel(None, &[]);
        let url = ch.sign_url("https://oapi.dingtalk.com/robot/send?access_token=t", 1).unwrap();
        assert_eq!(url, "https://oapi.dingtalk.com/robot/send?access_token=t");
    }

    #[test]
    fn signed_url_carries_timestamp_and_sign() {
        let ch = channel(Some("SECabc"), &[]);
        let url = ch
            .sign_url("https://oapi.dingtalk.com/robot/send?access_token=t", 1_700_000_000_000)
            .unwrap();
        assert!(url.contains("&timestamp=1700000000000&sign="));
        // Deterministic for a fixed timestamp.
        assert_eq!(
            url,
            ch.sign_url("https://oapi.dingtalk.com/robot/send?access_token=t", 1_700_000_000_000)
                .unwrap()
        );
    }

    #[test]
    fn text_payload_mentions_mobiles() {
        let ch = channel(None, &["13800000000", "13900000000"]);
        let n = Notification::new("cpu high", "cpu is 95", oxpulse_common::types::Severity::High);
        let payload = ch.build_payload(&n);
        assert_eq!(payload["msgtype"], "text");
        let content = payload["text"]["content"].as_str().unwrap();
        assert!(content.ends_with("@13800000000 @13900000000"));
        assert_eq!(payload["at"]["atMobiles"][1], "13900000000");
        assert_eq!(payload["at"]["isAtAll"], false);
    }

    #[test]
    fn errcode_is_checked() {
        assert!(check_errcode(r#"{"errcode":0,"errmsg":"ok"}"#).is_ok());
        let err = check_errcode(r#"{"errcode":310000,"errmsg":"sign not match"}"#).unwrap_err();
        assert!(err.to_string().contains("sign not match"));
        assert!(!err.is_retryable());
    }
}
