//! Error types and result handling for broker operations.
//!
//! Defines the structured error taxonomy the engines surface to callers:
//! stale ack tokens, missing resources, capacity bounds, and storage
//! failures. Errors on send/publish/subscribe propagate synchronously;
//! background redelivery and dispatch failures never reach the producer.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for broker operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The presented ack token does not match any current lease.
    ///
    /// Covers a message that was already acked, a lease that expired and
    /// was re-granted to another consumer, and tokens that never existed.
    /// Acking with a stale token is a caller error, safe to repeat, and
    /// never corrupts message state.
    #[error("invalid ack token: no active lease matches the presented token")]
    InvalidAckToken,

    /// Queue, topic, subscription, or message not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A bounded queue is at its configured depth.
    #[error("capacity exceeded: queue {queue_id} is at its bound of {max_depth}")]
    CapacityExceeded {
        /// The queue that rejected the send.
        queue_id: crate::models::QueueId,
        /// The configured depth bound.
        max_depth: i32,
    },

    /// Constraint violation, e.g. a duplicate queue or topic name.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Self::ConstraintViolation(format!("foreign key constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {db_err}"))
            },
            _ => Self::Storage(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueueId;

    #[test]
    fn invalid_ack_token_is_a_caller_error() {
        let err = CoreError::InvalidAckToken;
        assert!(err.to_string().contains("invalid ack token"));
    }

    #[test]
    fn capacity_error_names_the_queue() {
        let queue_id = QueueId::new();
        let err = CoreError::CapacityExceeded { queue_id, max_depth: 100 };
        assert!(err.to_string().contains(&queue_id.to_string()));
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = CoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
