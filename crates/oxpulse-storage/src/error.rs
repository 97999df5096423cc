/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use oxpulse_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert_rule",
///     id: "rule-99".to_string(),
/// };
/// assert!(err.to_string().contains("alert_rule"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness constraint rejected the write.
    #[error("Storage: {entity} '{key}' already exists")]
    Conflict { entity: &'static str, key: String },

    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// JSON serialization or deserialization failure (labels, config blobs).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored column could not be decoded into its domain type.
    #[error("Storage: invalid value in {entity}.{column}: {reason}")]
    Decode {
        entity: &'static str,
        column: &'static str,
        reason: String,
    },

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

impl StorageError {
    pub(crate) fn decode(entity: &'static str, column: &'static str, reason: impl ToString) -> Self {
        Self::Decode {
            entity,
            column,
            reason: reason.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
