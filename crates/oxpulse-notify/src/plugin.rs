use crate::error::{NotifyError, Result};
use crate::NotificationChannel;
use oxpulse_common::channel::{ChannelConfig, ChannelDefinition, ChannelType};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 插件创建通道时共享的资源
#[derive(Clone)]
pub struct PluginContext {
    pub http: reqwest::Client,
    pub smtp_timeout: Duration,
}

impl Default for PluginContext {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
            smtp_timeout: Duration::from_secs(30),
        }
    }
}

/// 通知通道插件：负责创建某一类型的 [`NotificationChannel`] 实例。
///
/// 传入的 [`ChannelConfig`] 已完成解析和校验；插件只需拒绝不属于自己的变体。
pub trait ChannelPlugin: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    fn create_channel(
        &self,
        name: &str,
        config: &ChannelConfig,
        ctx: &PluginContext,
    ) -> Result<Arc<dyn NotificationChannel>>;
}

/// 插件注册表
///
/// # Examples
///
/// ```
/// use oxpulse_common::channel::ChannelType;
/// use oxpulse_notify::plugin::ChannelRegistry;
///
/// let registry = ChannelRegistry::default();
/// assert!(registry.has_plugin(ChannelType::Email));
/// assert!(registry.has_plugin(ChannelType::Slack));
/// assert!(registry.validate("pager", &serde_json::json!({})).is_err());
/// ```
pub struct ChannelRegistry {
    plugins: HashMap<ChannelType, Box<dyn ChannelPlugin>>,
    ctx: PluginContext,
}

impl ChannelRegistry {
    pub fn new(ctx: PluginContext) -> Self {
        Self {
            plugins: HashMap::new(),
            ctx,
        }
    }

    /// 注册全部内置通道插件
    pub fn with_builtin(ctx: PluginContext) -> Self {
        let mut registry = Self::new(ctx);
        registry.register(Box::new(crate::channels::email::EmailPlugin));
        registry.register(Box::new(crate::channels::webhook::WebhookPlugin));
        registry.register(Box::new(crate::channels::slack::SlackPlugin));
        registry.register(Box::new(crate::channels::dingtalk::DingTalkPlugin));
        registry
    }

    /// 注册插件，同类型已存在时替换
    pub fn register(&mut self, plugin: Box<dyn ChannelPlugin>) {
        self.plugins.insert(plugin.channel_type(), plugin);
    }

    pub fn has_plugin(&self, channel_type: ChannelType) -> bool {
        self.plugins.contains_key(&channel_type)
    }

    pub fn channel_types(&self) -> Vec<ChannelType> {
        let mut types: Vec<ChannelType> = self.plugins.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// 保存前解析并校验原始配置
    pub fn validate(&self, channel_type: &str, config: &Value) -> Result<ChannelConfig> {
        let parsed = ChannelConfig::parse(channel_type, config)?;
        if !self.has_plugin(parsed.channel_type()) {
            return Err(NotifyError::UnknownChannelType(channel_type.to_string()));
        }
        Ok(parsed)
    }

    pub fn create_channel(&self, def: &ChannelDefinition) -> Result<Arc<dyn NotificationChannel>> {
        let plugin = self
            .plugins
            .get(&def.channel_type())
            .ok_or_else(|| NotifyError::UnknownChannelType(def.channel_type().to_string()))?;
        plugin.create_channel(&def.name, &def.config, &self.ctx)
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::with_builtin(PluginContext::default())
    }
}

pub(crate) fn wrong_variant(expected: ChannelType, got: &ChannelConfig) -> NotifyError {
    NotifyError::InvalidConfig(format!(
        "{expected} plugin received a {} configuration",
        got.channel_type()
    ))
}
