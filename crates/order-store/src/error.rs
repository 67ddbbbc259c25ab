use common::{IdempotencyKey, OrderId};
use domain::SagaPhase;
use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderStoreError {
    /// An order was already created for this idempotency key.
    #[error("Idempotency key {idempotency_key} already used by order {existing}")]
    Conflict {
        idempotency_key: IdempotencyKey,
        existing: OrderId,
    },

    /// The saga phase did not match the expected phase.
    /// Another driver advanced the saga first.
    #[error("Stale saga state for order {order_id}: expected {expected}, found {actual}")]
    StaleState {
        order_id: OrderId,
        expected: SagaPhase,
        actual: SagaPhase,
    },

    /// The order was not found in the store.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The requested phase or status change is not allowed.
    #[error("Invalid transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: &'static str,
        to: &'static str,
    },

    /// The store back-end could not be reached. Retryable.
    #[error("Order store unavailable: {0}")]
    Unavailable(String),
}

impl OrderStoreError {
    /// Returns true if the operation may succeed when retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrderStoreError::Unavailable(_))
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, OrderStoreError>;
