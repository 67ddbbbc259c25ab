use serde::{Deserialize, Serialize};

use super::effects::{ChargeId, Compensation, ReservationId, SagaAction};

/// What a single saga state change records.
///
/// Notes are stored in the order history in the order they happened. A
/// failed attempt is recorded as its own note, so a retried step leaves one
/// entry per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SagaNote {
    /// The saga began driving the order.
    Started,

    /// A remote call did not succeed.
    AttemptFailed { action: SagaAction, error: String },

    /// Stock is held under the given reservation.
    InventoryReserved { reservation_id: ReservationId },

    /// Payment was taken. `charge_id` is None when the outcome was ambiguous
    /// and the charge is assumed to have happened.
    PaymentCharged { charge_id: Option<ChargeId> },

    /// The order was committed as confirmed.
    Committed,

    /// The best-effort notification was attempted.
    Notified {
        kind: NotificationKind,
        delivered: bool,
    },

    /// The saga stopped moving forward and began undoing applied steps.
    CompensationStarted { reason: CancelReason },

    /// A compensating call was confirmed by the remote service.
    CompensationConfirmed { compensation: Compensation },

    /// The saga ended without effects left behind.
    Cancelled { reason: CancelReason },

    /// The saga ended with an effect that could not be undone or confirmed.
    CompensationFailed { reason: String },
}

impl SagaNote {
    /// Returns a short name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SagaNote::Started => "started",
            SagaNote::AttemptFailed { .. } => "attempt_failed",
            SagaNote::InventoryReserved { .. } => "inventory_reserved",
            SagaNote::PaymentCharged { .. } => "payment_charged",
            SagaNote::Committed => "committed",
            SagaNote::Notified { .. } => "notified",
            SagaNote::CompensationStarted { .. } => "compensation_started",
            SagaNote::CompensationConfirmed { .. } => "compensation_confirmed",
            SagaNote::Cancelled { .. } => "cancelled",
            SagaNote::CompensationFailed { .. } => "compensation_failed",
        }
    }
}

/// Why a saga stopped before confirming the order.
///
/// The display form is what the customer is told.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum CancelReason {
    /// The inventory service refused the reservation.
    InventoryRejected(String),

    /// The inventory service could not be reached.
    InventoryUnreachable,

    /// The payment service declined the charge.
    PaymentRejected(String),

    /// The payment service could not be reached.
    PaymentUnreachable,

    /// The caller went away before any stock was reserved.
    ClientCancelled,

    /// Processing stopped before any stock was reserved and was not resumed.
    Interrupted,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::InventoryRejected(reason) => {
                write!(f, "inventory could not be reserved: {reason}")
            }
            CancelReason::InventoryUnreachable => f.write_str("inventory service unreachable"),
            CancelReason::PaymentRejected(reason) => write!(f, "payment declined: {reason}"),
            CancelReason::PaymentUnreachable => f.write_str("payment service unreachable"),
            CancelReason::ClientCancelled => f.write_str("cancelled by client"),
            CancelReason::Interrupted => f.write_str("order processing was interrupted"),
        }
    }
}

/// The kind of message sent to the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderConfirmed,
    OrderCancelled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderConfirmed => "order_confirmed",
            NotificationKind::OrderCancelled => "order_cancelled",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
