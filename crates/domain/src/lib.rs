//! Domain layer for the order saga services.
//!
//! This crate provides:
//! - Order aggregate with invariants enforced at construction
//! - Money and order item value objects
//! - Saga state machine: phases, completed steps, transition notes and
//!   the compensations a saga owes

pub mod order;
pub mod saga;

pub use order::{Money, NewOrder, Order, OrderError, OrderItem, OrderStatus};
pub use saga::{
    CancelReason, ChargeId, Compensation, NotificationKind, ReservationId, SagaAction, SagaNote,
    SagaPhase, SagaState, SagaStep,
};
