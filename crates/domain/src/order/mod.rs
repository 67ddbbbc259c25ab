//! Order aggregate and related types.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::{NewOrder, Order};
pub use state::OrderStatus;
pub use value_objects::{Money, OrderItem};

use common::ProductId;
use thiserror::Error;

/// Reasons an order request is refused before anything is stored or called.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The order has no items.
    #[error("Order has no items")]
    NoItems,

    /// An item quantity is below one.
    #[error("Invalid quantity for product {product_id}: {quantity} (must be at least 1)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// An item price is negative.
    #[error("Invalid price for product {product_id}: {price} (must not be negative)")]
    InvalidPrice { product_id: ProductId, price: Money },

    /// The order total does not fit in the money representation.
    #[error("Order total overflows")]
    AmountOverflow,

    /// The shipping address is empty.
    #[error("Shipping address is required")]
    MissingShippingAddress,
}
