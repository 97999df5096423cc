//! Typed notification channel configuration.
//!
//! Channel rows store the configuration as a JSON blob next to a type tag.
//! The blob is decoded exactly once, at the repository boundary, into the
//! closed [`ChannelConfig`] sum type; adapters never re-parse raw JSON.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Replacement text for secrets in externally visible configuration.
pub const SECRET_MASK: &str = "***";

const SECRET_FIELDS: &[&str] = &["password", "secret"];

const WEBHOOK_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Webhook,
    Slack,
    DingTalk,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Webhook => "webhook",
            Self::Slack => "slack",
            Self::DingTalk => "dingtalk",
        }
    }

    pub fn all() -> [ChannelType; 4] {
        [Self::Email, Self::Webhook, Self::Slack, Self::DingTalk]
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "webhook" => Ok(Self::Webhook),
            "slack" => Ok(Self::Slack),
            "dingtalk" => Ok(Self::DingTalk),
            other => Err(ValidationError::UnknownChannelType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub to_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Per-channel timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Either an emoji short code (`:rotating_light:`) or an image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DingTalkConfig {
    pub webhook_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub at_mobiles: Vec<String>,
    #[serde(default)]
    pub at_all: bool,
}

/// Closed set of channel configurations, one variant per channel type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelConfig {
    Email(EmailConfig),
    Webhook(WebhookConfig),
    Slack(SlackConfig),
    DingTalk(DingTalkConfig),
}

fn decode<T: DeserializeOwned>(channel_type: ChannelType, config: &Value) -> Result<T, ValidationError> {
    serde_json::from_value(config.clone()).map_err(|e| ValidationError::Malformed {
        channel_type: channel_type.to_string(),
        reason: e.to_string(),
    })
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

fn require_http_url(field: &'static str, value: &str) -> Result<(), ValidationError> {
    require_non_empty(field, value)?;
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ValidationError::invalid(field, "must be an http(s) URL"));
    }
    Ok(())
}

impl ChannelConfig {
    /// Decodes and validates a raw configuration blob for `channel_type`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the type is unknown, a required field
    /// is missing or empty, or a value is out of range.
    pub fn parse(channel_type: &str, config: &Value) -> Result<Self, ValidationError> {
        let ty: ChannelType = channel_type.parse()?;
        let parsed = match ty {
            ChannelType::Email => Self::Email(decode(ty, config)?),
            ChannelType::Webhook => Self::Webhook(decode(ty, config)?),
            ChannelType::Slack => Self::Slack(decode(ty, config)?),
            ChannelType::DingTalk => Self::DingTalk(decode(ty, config)?),
        };
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Email(cfg) => {
                require_non_empty("smtp_host", &cfg.smtp_host)?;
                if cfg.smtp_port == 0 {
                    return Err(ValidationError::invalid("smtp_port", "must be between 1 and 65535"));
                }
                require_non_empty("username", &cfg.username)?;
                require_non_empty("password", &cfg.password)?;
                require_non_empty("from_address", &cfg.from_address)?;
                if cfg.to_addresses.is_empty() {
                    return Err(ValidationError::MissingField("to_addresses"));
                }
                if let Some(bad) = cfg.to_addresses.iter().find(|a| !a.contains('@')) {
                    return Err(ValidationError::invalid(
                        "to_addresses",
                        format!("'{bad}' is not an email address"),
                    ));
                }
            }
            Self::Webhook(cfg) => {
                require_http_url("url", &cfg.url)?;
                require_non_empty("method", &cfg.method)?;
                let method = cfg.method.to_uppercase();
                if !WEBHOOK_METHODS.contains(&method.as_str()) {
                    return Err(ValidationError::invalid(
                        "method",
                        format!("must be one of {}", WEBHOOK_METHODS.join(", ")),
                    ));
                }
                if cfg.timeout == Some(0) {
                    return Err(ValidationError::invalid("timeout", "must be positive"));
                }
            }
            Self::Slack(cfg) => require_http_url("webhook_url", &cfg.webhook_url)?,
            Self::DingTalk(cfg) => require_http_url("webhook_url", &cfg.webhook_url)?,
        }
        Ok(())
    }

    pub fn channel_type(&self) -> ChannelType {
        match self {
            Self::Email(_) => ChannelType::Email,
            Self::Webhook(_) => ChannelType::Webhook,
            Self::Slack(_) => ChannelType::Slack,
            Self::DingTalk(_) => ChannelType::DingTalk,
        }
    }

    /// The configuration blob without the type tag, as persisted.
    pub fn to_json(&self) -> Value {
        let value = match self {
            Self::Email(cfg) => serde_json::to_value(cfg),
            Self::Webhook(cfg) => serde_json::to_value(cfg),
            Self::Slack(cfg) => serde_json::to_value(cfg),
            Self::DingTalk(cfg) => serde_json::to_value(cfg),
        };
        value.unwrap_or(Value::Null)
    }

    /// Returns the configuration blob with `password`/`secret` masked.
    pub fn redacted(&self) -> Value {
        let mut value = self.to_json();
        if let Some(obj) = value.as_object_mut() {
            for field in SECRET_FIELDS {
                if let Some(v) = obj.get_mut(*field) {
                    if !v.is_null() {
                        *v = Value::String(SECRET_MASK.to_string());
                    }
                }
            }
        }
        value
    }
}

/// A stored notification channel with its decoded configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDefinition {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub config: ChannelConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelDefinition {
    pub fn channel_type(&self) -> ChannelType {
        self.config.channel_type()
    }
}
