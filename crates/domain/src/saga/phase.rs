use serde::{Deserialize, Serialize};

use crate::order::OrderStatus;

/// Position of a saga in the coordinator's state machine.
///
/// ```text
/// Pending ──► Reserving ──► Reserved ──► Charging ──► Charged ──► Committed ──► Notified
///    │            │             │            │            │
///    │            │             └────────────┴────────────┴──► Compensating ──┬──► Cancelled
///    └────────────┴──► Cancelled                                              └──► CompensationFailed
///                 └──► CompensationFailed
/// ```
///
/// Every non-terminal phase may also transition to itself; such a move
/// records an attempt or a confirmation without advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaPhase {
    #[default]
    Pending,
    Reserving,
    Reserved,
    Charging,
    Charged,
    Committed,
    Notified,
    Compensating,
    Cancelled,
    CompensationFailed,
}

impl SagaPhase {
    /// Returns true if the state machine allows moving to `next`.
    pub fn can_transition_to(&self, next: SagaPhase) -> bool {
        use SagaPhase::*;

        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Reserving)
                | (Pending, Cancelled)
                | (Reserving, Reserved)
                | (Reserving, Cancelled)
                | (Reserving, CompensationFailed)
                | (Reserved, Charging)
                | (Charging, Charged)
                | (Charged, Committed)
                | (Committed, Notified)
                | (Reserved | Charging | Charged, Compensating)
                | (Compensating, Cancelled)
                | (Compensating, CompensationFailed)
        )
    }

    /// Returns true if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaPhase::Notified | SagaPhase::Cancelled | SagaPhase::CompensationFailed
        )
    }

    /// Returns the order status this phase maps to.
    pub fn order_status(&self) -> OrderStatus {
        match self {
            SagaPhase::Committed | SagaPhase::Notified => OrderStatus::Confirmed,
            SagaPhase::Cancelled => OrderStatus::Cancelled,
            SagaPhase::CompensationFailed => OrderStatus::Failed,
            _ => OrderStatus::Pending,
        }
    }

    /// Returns the phase name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaPhase::Pending => "PENDING",
            SagaPhase::Reserving => "RESERVING",
            SagaPhase::Reserved => "RESERVED",
            SagaPhase::Charging => "CHARGING",
            SagaPhase::Charged => "CHARGED",
            SagaPhase::Committed => "COMMITTED",
            SagaPhase::Notified => "NOTIFIED",
            SagaPhase::Compensating => "COMPENSATING",
            SagaPhase::Cancelled => "CANCELLED",
            SagaPhase::CompensationFailed => "COMPENSATION_FAILED",
        }
    }
}

impl std::fmt::Display for SagaPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The last forward step a saga has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStep {
    #[default]
    None,
    InventoryReserved,
    PaymentCharged,
    OrderCommitted,
    Notified,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::None => "NONE",
            SagaStep::InventoryReserved => "INVENTORY_RESERVED",
            SagaStep::PaymentCharged => "PAYMENT_CHARGED",
            SagaStep::OrderCommitted => "ORDER_COMMITTED",
            SagaStep::Notified => "NOTIFIED",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SagaPhase; 10] = [
        SagaPhase::Pending,
        SagaPhase::Reserving,
        SagaPhase::Reserved,
        SagaPhase::Charging,
        SagaPhase::Charged,
        SagaPhase::Committed,
        SagaPhase::Notified,
        SagaPhase::Compensating,
        SagaPhase::Cancelled,
        SagaPhase::CompensationFailed,
    ];

    #[test]
    fn test_success_path_is_allowed() {
        let path = [
            SagaPhase::Pending,
            SagaPhase::Reserving,
            SagaPhase::Reserved,
            SagaPhase::Charging,
            SagaPhase::Charged,
            SagaPhase::Committed,
            SagaPhase::Notified,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_no_backward_moves() {
        assert!(!SagaPhase::Reserved.can_transition_to(SagaPhase::Reserving));
        assert!(!SagaPhase::Charged.can_transition_to(SagaPhase::Reserved));
        assert!(!SagaPhase::Committed.can_transition_to(SagaPhase::Charged));
        assert!(!SagaPhase::Compensating.can_transition_to(SagaPhase::Charging));
    }

    #[test]
    fn test_no_skipped_steps() {
        assert!(!SagaPhase::Pending.can_transition_to(SagaPhase::Reserved));
        assert!(!SagaPhase::Reserved.can_transition_to(SagaPhase::Charged));
        assert!(!SagaPhase::Charged.can_transition_to(SagaPhase::Notified));
    }

    #[test]
    fn test_committed_cannot_be_compensated() {
        assert!(!SagaPhase::Committed.can_transition_to(SagaPhase::Compensating));
        assert!(!SagaPhase::Committed.can_transition_to(SagaPhase::Cancelled));
    }

    #[test]
    fn test_terminal_phases_are_frozen() {
        for from in ALL.iter().filter(|p| p.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_self_transitions_for_live_phases() {
        for phase in ALL.iter().filter(|p| !p.is_terminal()) {
            assert!(phase.can_transition_to(*phase));
        }
    }

    #[test]
    fn test_order_status_mapping() {
        assert_eq!(SagaPhase::Pending.order_status(), OrderStatus::Pending);
        assert_eq!(SagaPhase::Charged.order_status(), OrderStatus::Pending);
        assert_eq!(SagaPhase::Compensating.order_status(), OrderStatus::Pending);
        assert_eq!(SagaPhase::Committed.order_status(), OrderStatus::Confirmed);
        assert_eq!(SagaPhase::Notified.order_status(), OrderStatus::Confirmed);
        assert_eq!(SagaPhase::Cancelled.order_status(), OrderStatus::Cancelled);
        assert_eq!(
            SagaPhase::CompensationFailed.order_status(),
            OrderStatus::Failed
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(SagaPhase::CompensationFailed.to_string(), "COMPENSATION_FAILED");
        assert_eq!(SagaStep::InventoryReserved.to_string(), "INVENTORY_RESERVED");
        let json = serde_json::to_string(&SagaPhase::Compensating).unwrap();
        assert_eq!(json, "\"COMPENSATING\"");
    }
}
