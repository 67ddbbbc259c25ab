use serde::{Deserialize, Serialize};

/// Confirmation identifier returned by the inventory service for a
/// reservation. Opaque to the saga.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(String);

impl ReservationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Confirmation identifier returned by the payment service for a charge.
/// Opaque to the saga.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChargeId(String);

impl ChargeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChargeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A remote action a saga performs, forward or compensating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaAction {
    ReserveInventory,
    ChargePayment,
    CommitOrder,
    Notify,
    ReleaseInventory,
    RefundPayment,
}

impl SagaAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaAction::ReserveInventory => "reserve_inventory",
            SagaAction::ChargePayment => "charge_payment",
            SagaAction::CommitOrder => "commit_order",
            SagaAction::Notify => "notify",
            SagaAction::ReleaseInventory => "release_inventory",
            SagaAction::RefundPayment => "refund_payment",
        }
    }
}

impl std::fmt::Display for SagaAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inverse operation the saga owes for a step it has applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Compensation {
    /// Give back the stock held by a reservation.
    ReleaseInventory { reservation_id: ReservationId },

    /// Return the money taken by a charge.
    RefundPayment { charge_id: ChargeId },
}

impl Compensation {
    /// Returns the remote action that performs this compensation.
    pub fn action(&self) -> SagaAction {
        match self {
            Compensation::ReleaseInventory { .. } => SagaAction::ReleaseInventory,
            Compensation::RefundPayment { .. } => SagaAction::RefundPayment,
        }
    }
}

impl std::fmt::Display for Compensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compensation::ReleaseInventory { reservation_id } => {
                write!(f, "release reservation {reservation_id}")
            }
            Compensation::RefundPayment { charge_id } => write!(f, "refund charge {charge_id}"),
        }
    }
}
