//! Saga error types.

use common::{IdempotencyKey, OrderId};
use domain::{OrderError, OrderStatus, SagaPhase};
use order_store::OrderStoreError;
use thiserror::Error;

/// Errors returned to callers of the saga coordinator.
///
/// Remote failures never appear here: they are resolved into a terminal
/// order status instead.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The order request failed validation. Nothing was stored or called.
    #[error("Invalid order request: {0}")]
    InvalidRequest(#[from] OrderError),

    /// No idempotency key was supplied.
    #[error("Idempotency key is required")]
    MissingIdempotencyKey,

    /// The idempotency key was already used for a different order request.
    #[error("Idempotency key {key} was already used for order {existing} with a different request")]
    IdempotencyKeyReused {
        key: IdempotencyKey,
        existing: OrderId,
    },

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Compensation was requested for a saga that is not compensating.
    #[error("Order {order_id} cannot be compensated in phase {phase}")]
    CompensationNotAllowed { order_id: OrderId, phase: SagaPhase },

    /// Only fulfillment stages can be set from outside the saga.
    #[error("Status {0} cannot be set directly; expected processing, shipped or delivered")]
    StatusNotSettable(OrderStatus),

    /// The order cannot move from its current status to the requested one.
    #[error("Order {order_id} cannot move from {from} to {to}")]
    StatusTransitionNotAllowed {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Order store error.
    #[error("Order store error: {0}")]
    Store(#[from] OrderStoreError),
}

impl SagaError {
    /// Returns true if another driver advanced the saga first.
    pub fn is_stale_state(&self) -> bool {
        matches!(self, SagaError::Store(OrderStoreError::StaleState { .. }))
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
