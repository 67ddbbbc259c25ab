//! Order status.

use serde::{Deserialize, Serialize};

/// The committed status of an order.
///
/// Status transitions:
/// ```text
/// Pending ──┬──► Confirmed ──► Processing ──► Shipped ──► Delivered
///           ├──► Cancelled
///           └──► Failed
/// ```
///
/// The saga settles an order as `Confirmed`, `Cancelled` or `Failed`.
/// Fulfillment then moves a confirmed order forward, possibly skipping
/// stages, but never back.
///
/// `Failed` means compensation could not be confirmed and an operator has to
/// step in. It is never shown to the customer as a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// The saga is still running.
    #[default]
    Pending,

    /// Inventory reserved, payment taken, order committed.
    Confirmed,

    /// The order is being prepared for shipping.
    Processing,

    /// The order has left the warehouse.
    Shipped,

    /// The order reached the customer (terminal state).
    Delivered,

    /// The saga stopped and every applied step was undone (terminal state).
    Cancelled,

    /// Compensation could not be confirmed (terminal state).
    Failed,
}

impl OrderStatus {
    /// Returns true if the saga settles an order with this status.
    pub fn is_saga_outcome(&self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Returns true for the stages a confirmed order moves through.
    pub fn is_fulfillment(&self) -> bool {
        matches!(
            self,
            OrderStatus::Processing | OrderStatus::Shipped | OrderStatus::Delivered
        )
    }

    /// Position in the confirmed order's lifecycle, if it has one.
    fn fulfillment_stage(&self) -> Option<u8> {
        match self {
            OrderStatus::Confirmed => Some(0),
            OrderStatus::Processing => Some(1),
            OrderStatus::Shipped => Some(2),
            OrderStatus::Delivered => Some(3),
            _ => None,
        }
    }

    /// Returns true if the status may move to `next`.
    ///
    /// Re-applying the current status is allowed so that a retried commit is
    /// harmless.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if *self == next {
            return true;
        }
        match (self, self.fulfillment_stage(), next.fulfillment_stage()) {
            (OrderStatus::Pending, _, _) => next.is_saga_outcome(),
            (_, Some(current), Some(target)) => target > current,
            _ => false,
        }
    }

    /// Returns true if the order is at `status` or has already moved past it.
    ///
    /// A confirmed order that has shipped still counts as confirmed.
    pub fn has_reached(&self, status: OrderStatus) -> bool {
        if *self == status {
            return true;
        }
        match (self.fulfillment_stage(), status.fulfillment_stage()) {
            (Some(current), Some(target)) => current >= target,
            _ => false,
        }
    }

    /// Returns true if the order needs operator intervention.
    pub fn requires_operator(&self) -> bool {
        matches!(self, OrderStatus::Failed)
    }

    /// Returns the status name as shown to the customer who placed the order.
    ///
    /// An order awaiting an operator is still "processing" from the
    /// customer's point of view.
    pub fn customer_view(&self) -> &'static str {
        match self {
            OrderStatus::Pending | OrderStatus::Failed | OrderStatus::Processing => "processing",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_pending_moves_to_any_saga_outcome() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
    }

    #[test]
    fn test_terminal_statuses_never_move() {
        for terminal in [
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ] {
            assert!(!terminal.can_transition_to(OrderStatus::Pending));
            assert!(!terminal.can_transition_to(OrderStatus::Processing));
            assert!(terminal.can_transition_to(terminal));
        }
        assert!(!OrderStatus::Confirmed.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Confirmed));
        assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Shipped));
    }

    #[test]
    fn test_fulfillment_only_moves_forward() {
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Delivered));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Shipped));

        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Processing));
        assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::Confirmed));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_shipped_order_has_reached_confirmed() {
        assert!(OrderStatus::Shipped.has_reached(OrderStatus::Confirmed));
        assert!(OrderStatus::Shipped.has_reached(OrderStatus::Shipped));
        assert!(!OrderStatus::Processing.has_reached(OrderStatus::Shipped));
        assert!(!OrderStatus::Cancelled.has_reached(OrderStatus::Confirmed));
        assert!(!OrderStatus::Pending.has_reached(OrderStatus::Confirmed));
    }

    #[test]
    fn test_customer_view_hides_failed() {
        assert_eq!(OrderStatus::Pending.customer_view(), "processing");
        assert_eq!(OrderStatus::Failed.customer_view(), "processing");
        assert_eq!(OrderStatus::Confirmed.customer_view(), "confirmed");
        assert_eq!(OrderStatus::Cancelled.customer_view(), "cancelled");
        assert_eq!(OrderStatus::Shipped.customer_view(), "shipped");
        assert!(OrderStatus::Failed.requires_operator());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&OrderStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let deserialized: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, OrderStatus::Cancelled);
    }
}
