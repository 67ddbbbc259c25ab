//! Saga state machine for order creation.
//!
//! A saga drives one order through inventory reservation, payment and
//! commit. Its state lives next to the order in the store and is changed
//! only by recording a [`SagaNote`] together with a phase transition.

mod effects;
mod note;
mod phase;
mod state;

pub use effects::{ChargeId, Compensation, ReservationId, SagaAction};
pub use note::{CancelReason, NotificationKind, SagaNote};
pub use phase::{SagaPhase, SagaStep};
pub use state::SagaState;
