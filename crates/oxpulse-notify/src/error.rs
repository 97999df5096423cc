use oxpulse_common::error::ValidationError;

/// Errors that can occur within the notification subsystem.
///
/// # Examples
///
/// ```rust
/// use oxpulse_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing smtp_host".to_string());
/// assert!(err.to_string().contains("smtp_host"));
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The channel type has no registered plugin.
    #[error("Notify: unknown channel type '{0}'")]
    UnknownChannelType(String),

    /// An HTTP request to an external notification endpoint failed.
    #[error("Notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// SMTP transport error when sending email.
    #[error("Notify: SMTP error: {0}")]
    Smtp(String),

    #[error("Notify: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The external API returned a non-success response.
    #[error("Notify: API error from {service}: status={status}, body={body}")]
    Api {
        service: String,
        status: u16,
        body: String,
    },

    /// The channel did not finish within its time budget, retries included.
    #[error("Notify: channel '{channel}' timed out after {secs}s")]
    Timeout { channel: String, secs: u64 },

    #[error("Notify: {0}")]
    Other(String),
}

impl NotifyError {
    /// Whether another attempt might succeed.
    ///
    /// Transport failures, 5xx and 429 responses are retried; configuration
    /// errors and other 4xx responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Smtp(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<ValidationError> for NotifyError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::UnknownChannelType(t) => Self::UnknownChannelType(t),
            other => Self::InvalidConfig(other.to_string()),
        }
    }
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// One channel that was attempted and failed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChannelFailure {
    pub channel: String,
    pub error: String,
}

/// One channel name that was not attempted at all.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SkippedChannel {
    pub channel: String,
    pub reason: String,
}

/// Per-channel outcome of a dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatchReport {
    pub sent: Vec<String>,
    pub failed: Vec<ChannelFailure>,
    pub skipped: Vec<SkippedChannel>,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.sent.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Returned by [`crate::dispatcher::Dispatcher::send`] when at least one
/// attempted channel failed. Successful sends are not rolled back; the full
/// report is carried along.
#[derive(Debug, thiserror::Error)]
#[error("{}", summarize(&.report))]
pub struct AggregateError {
    pub report: DispatchReport,
}

fn summarize(report: &DispatchReport) -> String {
    let details = report
        .failed
        .iter()
        .map(|f| format!("{}: {}", f.channel, f.error))
        .collect::<Vec<_>>()
        .join("; ");
    format!(
        "{} of {} notification channel(s) failed: {details}",
        report.failed.len(),
        report.attempted()
    )
}
