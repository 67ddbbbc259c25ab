//! Saga orchestration for order creation.
//!
//! This crate provides:
//! - Client adapters for the inventory, payment and notification services,
//!   with in-memory and HTTP implementations
//! - A compensation engine that unwinds applied steps in reverse order
//! - The saga coordinator, which reserves stock, charges payment, commits
//!   the order and notifies the customer
//!
//! If a step fails after stock is reserved, the steps already applied are
//! compensated in reverse order. A compensation that cannot be confirmed
//! leaves the order `failed` for an operator.

pub mod cancel;
pub mod compensation;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod retry;
pub mod services;

pub use cancel::{CancelOnDrop, CancelToken};
pub use compensation::{CompensationEngine, CompensationReport};
pub use config::SagaConfig;
pub use coordinator::{CreateOrder, OrderPlacement, SagaCoordinator};
pub use error::{Result, SagaError};
pub use retry::RetryPolicy;
pub use services::{
    CallContext, HttpInventoryService, HttpNotificationService, HttpPaymentService,
    InMemoryInventoryService, InMemoryNotificationService, InMemoryPaymentService,
    InventoryService, Notification, NotificationService, PaymentService, SecurityContext,
    ServiceError,
};
