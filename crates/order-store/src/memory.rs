use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{IdempotencyKey, OrderId};
use domain::{NewOrder, OrderStatus, SagaNote, SagaPhase};
use tokio::sync::RwLock;

use crate::{Change, OrderRecord, OrderStore, OrderStoreError, Result, Revision};

#[derive(Default)]
struct Inner {
    orders: HashMap<OrderId, OrderRecord>,
    by_key: HashMap<IdempotencyKey, OrderId>,
}

/// In-memory order store.
///
/// Orders and the idempotency key index live behind a single lock, so every
/// operation is atomic with respect to every other. The lock is only held
/// for the duration of a store call.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.inner.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: NewOrder, idempotency_key: IdempotencyKey) -> Result<OrderId> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.by_key.get(&idempotency_key) {
            return Err(OrderStoreError::Conflict {
                idempotency_key,
                existing: *existing,
            });
        }

        let order = order.into_order(OrderId::new(), Utc::now());
        let order_id = order.id();
        inner.by_key.insert(idempotency_key.clone(), order_id);
        inner
            .orders
            .insert(order_id, OrderRecord::new(order, idempotency_key));

        tracing::debug!(%order_id, "order created");
        Ok(order_id)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.orders.get(&order_id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        idempotency_key: &IdempotencyKey,
    ) -> Result<Option<OrderRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_key
            .get(idempotency_key)
            .and_then(|order_id| inner.orders.get(order_id))
            .cloned())
    }

    async fn advance_state(
        &self,
        order_id: OrderId,
        expected: SagaPhase,
        next: SagaPhase,
        note: SagaNote,
    ) -> Result<Revision> {
        let mut inner = self.inner.write().await;
        let record = inner
            .orders
            .get_mut(&order_id)
            .ok_or(OrderStoreError::NotFound(order_id))?;

        let actual = record.saga.phase;
        if actual != expected {
            return Err(OrderStoreError::StaleState {
                order_id,
                expected,
                actual,
            });
        }
        if !actual.can_transition_to(next) {
            return Err(OrderStoreError::InvalidTransition {
                order_id,
                from: actual.as_str(),
                to: next.as_str(),
            });
        }

        record.saga.apply(next, &note);
        tracing::debug!(%order_id, from = %actual, to = %next, note = note.kind(), "saga advanced");

        let change = Change::Phase {
            from: actual,
            to: next,
            note,
        };
        Ok(record.record(change, Utc::now()))
    }

    async fn set_final_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Revision> {
        let mut inner = self.inner.write().await;
        let record = inner
            .orders
            .get_mut(&order_id)
            .ok_or(OrderStoreError::NotFound(order_id))?;

        let now = Utc::now();
        let current = record.order.status();
        match record.order.set_status(status, now) {
            None => Err(OrderStoreError::InvalidTransition {
                order_id,
                from: current.as_str(),
                to: status.as_str(),
            }),
            Some(previous) if previous.has_reached(status) => Ok(record.revision),
            Some(previous) => {
                tracing::debug!(%order_id, from = %previous, to = %status, "order status set");
                Ok(record.record(
                    Change::Status {
                        from: previous,
                        to: status,
                    },
                    now,
                ))
            }
        }
    }

    async fn list(&self) -> Result<Vec<OrderRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<_> = inner.orders.values().cloned().collect();
        records.sort_by(|a, b| {
            a.order
                .created_at()
                .cmp(&b.order.created_at())
                .then(a.id().cmp(&b.id()))
        });
        Ok(records)
    }
}
