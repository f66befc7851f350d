//! Error types for stage execution
//!
//! Stages signal outcomes through [`crate::stage::Continuation`]; errors
//! are reserved for contract violations and remote failures. The
//! exception-free stage decorator classifies them: business failures end
//! the test as `FAIL`, everything else as `ERROR`.

use thiserror::Error;
use uuid::Uuid;

use shared::models::OrderStatusKind;

use crate::api::ApiError;

/// Convenience result type for stage code
pub type StageResult<T> = Result<T, StageError>;

/// Stage-level error types
#[derive(Debug, Error)]
pub enum StageError {
    /// The target violated an expected contract (wrong status, timeout
    /// waiting for an observable change, bookkeeping mismatch)
    #[error("Stage failed: {0}")]
    Failed(String),

    /// An observed status pair is not in the legal transition set
    #[error("E_ILLEGAL_ORDER_TRANSITION: {from} -> {to}")]
    IllegalTransition {
        from: OrderStatusKind,
        to: OrderStatusKind,
    },

    /// The transition table has no entry for the source state
    #[error("Unknown order state: {0}")]
    UnknownState(OrderStatusKind),

    /// The user pool holds no users for the service
    #[error("No users for service: {0}")]
    NoUsersForService(String),

    /// The credit ledger has no entry for the user
    #[error("Unknown user: {0}")]
    UnknownUser(Uuid),

    /// Remote or transport error from the external service API
    #[error("Remote error: {0}")]
    Remote(#[from] ApiError),

    /// Test context misuse (an id assigned twice, a missing precondition)
    #[error("Context error: {0}")]
    Context(String),
}

impl StageError {
    /// Check whether this error is a business failure
    ///
    /// Business failures mean the target broke its contract and map to the
    /// `FAIL` outcome; everything else is unexpected and maps to `ERROR`.
    pub fn is_business_failure(&self) -> bool {
        matches!(
            self,
            StageError::Failed(_) | StageError::IllegalTransition { .. }
        )
    }

    /// Create a business failure with details
    pub fn failed(details: impl Into<String>) -> Self {
        StageError::Failed(details.into())
    }

    /// Create a context-misuse error
    pub fn context(details: impl Into<String>) -> Self {
        StageError::Context(details.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_failure_classification() {
        assert!(StageError::failed("status drifted").is_business_failure());
        assert!(StageError::IllegalTransition {
            from: OrderStatusKind::Booked,
            to: OrderStatusKind::Delivered,
        }
        .is_business_failure());

        assert!(!StageError::UnknownState(OrderStatusKind::Failed).is_business_failure());
        assert!(!StageError::NoUsersForService("svc".into()).is_business_failure());
        assert!(!StageError::Remote(ApiError::transport("connection reset")).is_business_failure());
        assert!(!StageError::context("order id assigned twice").is_business_failure());
    }

    #[test]
    fn test_error_display() {
        let err = StageError::IllegalTransition {
            from: OrderStatusKind::Booked,
            to: OrderStatusKind::Delivered,
        };
        assert_eq!(
            err.to_string(),
            "E_ILLEGAL_ORDER_TRANSITION: Booked -> Delivered"
        );
    }
}
