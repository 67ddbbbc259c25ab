//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{Money, OrderError, OrderItem, OrderStatus};

/// A validated order request that has not been stored yet.
///
/// Construction is the only place item and address invariants are checked,
/// and the only place the total is computed, so there is no `Deserialize`.
///
/// ```compile_fail
/// let order: domain::NewOrder = serde_json::from_str(r#"{"items": []}"#).unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrder {
    user_id: UserId,
    items: Vec<OrderItem>,
    shipping_address: String,
    total_amount: Money,
}

impl NewOrder {
    /// Validates the request and computes its total.
    pub fn new(
        user_id: UserId,
        items: Vec<OrderItem>,
        shipping_address: impl Into<String>,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut total_amount = Money::zero();
        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: item.quantity,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id,
                    price: item.unit_price,
                });
            }
            total_amount = item
                .line_total()
                .and_then(|line| total_amount.checked_add(line))
                .ok_or(OrderError::AmountOverflow)?;
        }

        let shipping_address = shipping_address.into();
        if shipping_address.trim().is_empty() {
            return Err(OrderError::MissingShippingAddress);
        }

        Ok(Self {
            user_id,
            items,
            shipping_address,
            total_amount,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn shipping_address(&self) -> &str {
        &self.shipping_address
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Turns the request into a pending order with the given identity.
    pub fn into_order(self, id: OrderId, now: DateTime<Utc>) -> Order {
        Order {
            id,
            user_id: self.user_id,
            items: self.items,
            total_amount: self.total_amount,
            shipping_address: self.shipping_address,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Order aggregate root.
///
/// Items and total are fixed at creation. Only the status and `updated_at`
/// change afterwards, and only through [`Order::set_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    items: Vec<OrderItem>,
    total_amount: Money,
    shipping_address: String,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the items in the order they were requested.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn shipping_address(&self) -> &str {
        &self.shipping_address
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the total quantity of all items.
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Returns true if this order was produced from an equivalent request.
    ///
    /// Used to tell a genuine retry from a reused idempotency key.
    pub fn matches_request(&self, request: &NewOrder) -> bool {
        self.user_id == request.user_id
            && self.items == request.items
            && self.shipping_address == request.shipping_address
    }
}

// Command methods
impl Order {
    /// Moves the order to `status`.
    ///
    /// Returns the previous status, or None if the move is not allowed.
    /// Re-applying the current status, or one the order has already moved
    /// past, succeeds without touching anything.
    pub fn set_status(&mut self, status: OrderStatus, now: DateTime<Utc>) -> Option<OrderStatus> {
        let previous = self.status;
        if previous.has_reached(status) {
            return Some(previous);
        }
        if !previous.can_transition_to(status) {
            return None;
        }
        self.status = status;
        self.updated_at = now;
        Some(previous)
    }
}
