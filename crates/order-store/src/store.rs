use async_trait::async_trait;
use common::{IdempotencyKey, OrderId};
use domain::{NewOrder, OrderStatus, SagaNote, SagaPhase};

use crate::{OrderRecord, OrderStoreError, Result, Revision};

/// Core trait for order store implementations.
///
/// The store is the only place order records are kept. All implementations
/// must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Stores a new order with a fresh saga and returns its assigned id.
    ///
    /// The order starts `pending` with the saga in `Pending`. Fails with
    /// `Conflict` if an order already exists for `idempotency_key`.
    async fn create(&self, order: NewOrder, idempotency_key: IdempotencyKey) -> Result<OrderId>;

    /// Retrieves an order record.
    ///
    /// Returns None if the order doesn't exist.
    async fn get(&self, order_id: OrderId) -> Result<Option<OrderRecord>>;

    /// Retrieves the order created for an idempotency key.
    async fn find_by_idempotency_key(
        &self,
        idempotency_key: &IdempotencyKey,
    ) -> Result<Option<OrderRecord>>;

    /// Moves the saga from `expected` to `next`, recording `note`.
    ///
    /// This is a compare-and-swap: it fails with `StaleState` if the stored
    /// phase is not `expected`, and with `InvalidTransition` if the state
    /// machine forbids the move. `expected == next` records the note without
    /// moving the phase.
    ///
    /// Returns the new revision of the record.
    async fn advance_state(
        &self,
        order_id: OrderId,
        expected: SagaPhase,
        next: SagaPhase,
        note: SagaNote,
    ) -> Result<Revision>;

    /// Sets the order status, either the saga's outcome or a later
    /// fulfillment stage.
    ///
    /// Status only moves forward. Setting a status the order is already at,
    /// or has moved past, succeeds and returns the current revision without
    /// recording anything.
    async fn set_final_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Revision>;

    /// Lists every order, oldest first.
    async fn list(&self) -> Result<Vec<OrderRecord>>;
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Retrieves an order record, failing with `NotFound` if it is missing.
    async fn require(&self, order_id: OrderId) -> Result<OrderRecord> {
        self.get(order_id)
            .await?
            .ok_or(OrderStoreError::NotFound(order_id))
    }

    /// Lists orders whose saga has not reached a terminal phase.
    async fn list_in_flight(&self) -> Result<Vec<OrderRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|record| !record.is_settled())
            .collect())
    }
}

// Blanket implementation for all OrderStore implementations
impl<T: OrderStore + ?Sized> OrderStoreExt for T {}

