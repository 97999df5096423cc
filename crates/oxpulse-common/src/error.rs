/// Rejection reasons for rule and channel definitions checked before save.
///
/// # Examples
///
/// ```rust
/// use oxpulse_common::error::ValidationError;
///
/// let err = ValidationError::MissingField("smtp_host");
/// assert!(err.to_string().contains("smtp_host"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unknown channel type '{0}'")]
    UnknownChannelType(String),

    /// The raw configuration blob could not be decoded for the given type.
    #[error("invalid {channel_type} config: {reason}")]
    Malformed { channel_type: String, reason: String },
}

impl ValidationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
