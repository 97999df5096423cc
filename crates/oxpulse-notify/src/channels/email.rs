use crate::color::SeverityColor;
use crate::error::{NotifyError, Result};
use crate::plugin::{wrong_variant, ChannelPlugin, PluginContext};
use crate::utils::html_escape;
use crate::{Notification, NotificationChannel};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use oxpulse_common::channel::{ChannelConfig, ChannelType, EmailConfig};
use oxpulse_common::types::format_labels;
use std::sync::Arc;
use std::time::Duration;

pub struct EmailChannel {
    name: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

fn parse_mailbox(field: &str, value: &str) -> Result<Mailbox> {
    value
        .parse()
        .map_err(|e| NotifyError::InvalidConfig(format!("{field} '{value}': {e}")))
}

impl EmailChannel {
    pub fn new(name: &str, config: &EmailConfig, timeout: Duration) -> Result<Self> {
        let smtp_err = |e: lettre::transport::smtp::Error| NotifyError::Smtp(e.to_string());
        // 465 is implicit TLS, 587 STARTTLS; anything else is treated as a
        // plain relay (local MTAs, test servers).
        let builder = match config.smtp_port {
            465 => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host).map_err(smtp_err)?,
            587 => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(smtp_err)?,
            _ => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host),
        };
        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(timeout))
            .build();

        let to = config
            .to_addresses
            .iter()
            .map(|a| parse_mailbox("to_addresses", a))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            transport,
            from: parse_mailbox("from_address", &config.from_address)?,
            to,
        })
    }

    pub fn format_plain(notification: &Notification) -> String {
        let labels = format_labels(&notification.labels);
        let labels_line = if labels.is_empty() {
            String::new()
        } else {
            format!("\nLabels: {labels}")
        };
        format!(
            "{subject}\n\n{content}\n\nSeverity: {severity}\nStatus: {status}{labels_line}\nTime: {time}",
            subject = notification.subject(),
            content = notification.content,
            severity = notification.severity,
            status = notification.kind.as_str(),
            time = notification.timestamp.to_rfc3339(),
        )
    }

    pub fn format_html(notification: &Notification) -> String {
        let color = SeverityColor::for_severity(notification.severity).hex();
        let label_rows: String = notification
            .labels
            .iter()
            .map(|(k, v)| {
                format!(
                    "<tr><td><b>{}</b></td><td>{}</td></tr>",
                    html_escape(k),
                    html_escape(v)
                )
            })
            .collect();
        format!(
            "<html><body>\
             <div style=\"border-left:6px solid {color};padding:8px 12px\">\
             <h3>{subject}</h3><p>{content}</p>\
             <table>\
             <tr><td><b>Severity</b></td><td>{severity}</td></tr>\
             <tr><td><b>Status</b></td><td>{status}</td></tr>\
             {label_rows}\
             <tr><td><b>Time</b></td><td>{time}</td></tr>\
             </table></div></body></html>",
            subject = html_escape(&notification.subject()),
            content = html_escape(&notification.content).replace('\n', "<br>"),
            severity = notification.severity,
            status = notification.kind.as_str(),
            time = notification.timestamp.to_rfc3339(),
        )
    }

    pub fn build_message(&self, notification: &Notification) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(notification.subject());
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        builder
            .multipart(MultiPart::alternative_plain_html(
                Self::format_plain(notification),
                Self::format_html(notification),
            ))
            .map_err(|e| NotifyError::Smtp(e.to_string()))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let message = self.build_message(notification)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        Ok(())
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct EmailPlugin;

impl ChannelPlugin for EmailPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn create_channel(
        &self,
        name: &str,
        config: &ChannelConfig,
        ctx: &PluginContext,
    ) -> Result<Arc<dyn NotificationChannel>> {
        match config {
            ChannelConfig::Email(cfg) => {
                Ok(Arc::new(EmailChannel::new(name, cfg, ctx.smtp_timeout)?))
            }
            other => Err(wrong_variant(ChannelType::Email, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxpulse_common::types::Severity;

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: "localhost".into(),
            smtp_port: 2525,
            username: "alerts".into(),
            password: "hunter2".into(),
            from_address: "alerts@example.com".into(),
            to_addresses: vec!["ops@example.com".into(), "sre@example.com".into()],
        }
    }

    #[test]
    fn message_is_multipart_alternative_to_every_recipient() {
        let ch = EmailChannel::new("ops-email", &config(), Duration::from_secs(5)).unwrap();
        let mut n = Notification::new("disk full", "disk <root> at 99%", Severity::Critical);
        n.labels.insert("mount".into(), "/".into());
        let raw = String::from_utf8(ch.build_message(&n).unwrap().formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("sre@example.com"));
    }

    #[test]
    fn html_body_escapes_content_and_uses_severity_color() {
        let n = Notification::new("disk full", "disk <root> at 99%", Severity::Critical);
        let html = EmailChannel::format_html(&n);
        assert!(html.contains("&lt;root&gt;"));
        assert!(html.contains(SeverityColor::Red.hex()));
    }

    #[test]
    fn bad_recipient_is_rejected_at_creation() {
        let mut cfg = config();
        cfg.to_addresses = vec!["not an address@".into()];
        assert!(matches!(
            EmailChannel::new("ops-email", &cfg, Duration::from_secs(5)),
            Err(NotifyError::InvalidConfig(_))
        ));
    }
}
