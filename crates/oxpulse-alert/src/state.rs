use oxpulse_common::types::{Alert, AlertStatus};
use oxpulse_storage::StorageError;

/// A status change the alert lifecycle does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("alert {alert_id} cannot move from {from} to {to}")]
pub struct InvalidStateError {
    pub alert_id: String,
    pub from: AlertStatus,
    pub to: AlertStatus,
}

/// Errors of operator actions on a single alert.
#[derive(Debug, thiserror::Error)]
pub enum AlertActionError {
    #[error("alert {0} not found")]
    NotFound(String),

    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Rejects transitions that are not an edge of
/// `firing -> acknowledged -> resolved` or `firing -> resolved`.
pub fn ensure_transition(alert: &Alert, to: AlertStatus) -> Result<(), InvalidStateError> {
    if alert.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(InvalidStateError {
            alert_id: alert.id.clone(),
            from: alert.status,
            to,
        })
    }
}
