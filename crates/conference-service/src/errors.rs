//! Conference orchestrator error types.
//!
//! Precondition failures on guarded status transitions are deliberately NOT
//! errors: an "end conference" whose precondition no longer holds means the
//! desired terminal state is already reached, and repositories report it as
//! an `Option`/count, never as an `Err`. The request layer maps the variants
//! below onto its own wire codes.

use thiserror::Error;
use uuid::Uuid;

/// Conference orchestrator error type.
#[derive(Debug, Error)]
pub enum ConferenceError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Conference not found.
    #[error("Conference not found: {0}")]
    ConferenceNotFound(Uuid),

    /// Participant not found.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Role change rejected by the permission evaluator.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Conference is at its member limit.
    #[error("Conference at capacity: {0}")]
    CapacityExceeded(Uuid),

    /// Malformed request from the caller.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convert sqlx errors to `ConferenceError`.
impl From<sqlx::Error> for ConferenceError {
    fn from(err: sqlx::Error) -> Self {
        ConferenceError::Database(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formatting() {
        let id = Uuid::nil();
        assert_eq!(
            format!("{}", ConferenceError::ConferenceNotFound(id)),
            format!("Conference not found: {id}")
        );
        assert_eq!(
            format!(
                "{}",
                ConferenceError::PermissionDenied("moderator cannot demote moderator".to_string())
            ),
            "Permission denied: moderator cannot demote moderator"
        );
        assert_eq!(
            format!("{}", ConferenceError::Database("connection refused".to_string())),
            "Database error: connection refused"
        );
    }

    #[test]
    fn test_from_sqlx_error() {
        let err: ConferenceError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ConferenceError::Database(_)));
    }
}
