//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, ProductId};
use domain::{OrderItem, ReservationId};

use super::script::{Script, Scripted, lock};
use super::{CallContext, ServiceError};

/// Trait for inventory reservation operations.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves stock for the given items.
    ///
    /// The order id is the reservation reference: reserving again for the
    /// same order returns the existing reservation.
    async fn reserve(
        &self,
        ctx: &CallContext,
        order_id: OrderId,
        items: &[OrderItem],
    ) -> Result<ReservationId, ServiceError>;

    /// Releases a reservation. Releasing an unknown or already released
    /// reservation succeeds.
    async fn release(
        &self,
        ctx: &CallContext,
        reservation_id: &ReservationId,
    ) -> Result<(), ServiceError>;
}

#[async_trait]
impl<T: InventoryService + ?Sized> InventoryService for Arc<T> {
    async fn reserve(
        &self,
        ctx: &CallContext,
        order_id: OrderId,
        items: &[OrderItem],
    ) -> Result<ReservationId, ServiceError> {
        (**self).reserve(ctx, order_id, items).await
    }

    async fn release(
        &self,
        ctx: &CallContext,
        reservation_id: &ReservationId,
    ) -> Result<(), ServiceError> {
        (**self).release(ctx, reservation_id).await
    }
}

#[derive(Debug)]
struct Reservation {
    order_id: OrderId,
    items: Vec<(ProductId, u32)>,
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    stock: HashMap<ProductId, u32>,
    reservations: HashMap<ReservationId, Reservation>,
    by_order: HashMap<OrderId, ReservationId>,
    next_id: u32,
    reserve_calls: usize,
    release_calls: usize,
    released: Vec<ReservationId>,
    reserve_script: Script,
    release_script: Script,
    latency: Option<Duration>,
}

/// In-memory inventory service.
///
/// Products without a stock level are treated as unlimited. Failures can be
/// scripted per operation.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<Mutex<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the available stock for a product.
    pub fn set_stock(&self, product_id: impl Into<ProductId>, quantity: u32) {
        lock(&self.state).stock.insert(product_id.into(), quantity);
    }

    /// Returns the available stock for a product, if tracked.
    pub fn stock(&self, product_id: impl Into<ProductId>) -> Option<u32> {
        lock(&self.state).stock.get(&product_id.into()).copied()
    }

    /// Makes the next reserve call fail with `error` without reserving.
    pub fn fail_next_reserve(&self, error: ServiceError) {
        lock(&self.state).reserve_script.push(Scripted::Fail(error));
    }

    /// Makes every reserve call fail with `error`, or clears it.
    pub fn fail_all_reserves(&self, error: Option<ServiceError>) {
        lock(&self.state).reserve_script.set_always(error);
    }

    /// Makes the next reserve call reserve the stock but answer `Unknown`.
    pub fn lose_next_reserve_response(&self) {
        lock(&self.state)
            .reserve_script
            .push(Scripted::ApplyThenFail(ServiceError::Unknown(
                "connection reset after request was sent".to_string(),
            )));
    }

    /// Makes the next release call fail with `error` without releasing.
    pub fn fail_next_release(&self, error: ServiceError) {
        lock(&self.state).release_script.push(Scripted::Fail(error));
    }

    /// Makes every release call fail with `error`, or clears it.
    pub fn fail_all_releases(&self, error: Option<ServiceError>) {
        lock(&self.state).release_script.set_always(error);
    }

    /// Delays every reserve call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        lock(&self.state).latency = latency;
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        lock(&self.state).reservations.len()
    }

    /// Returns true if a reservation exists with the given ID.
    pub fn has_reservation(&self, reservation_id: &ReservationId) -> bool {
        lock(&self.state).reservations.contains_key(reservation_id)
    }

    /// Returns the number of reserve calls received.
    pub fn reserve_calls(&self) -> usize {
        lock(&self.state).reserve_calls
    }

    /// Returns the number of release calls received.
    pub fn release_calls(&self) -> usize {
        lock(&self.state).release_calls
    }

    /// Returns the reservations released so far, in order.
    pub fn released(&self) -> Vec<ReservationId> {
        lock(&self.state).released.clone()
    }
}

impl InMemoryInventoryState {
    fn apply_reserve(
        &mut self,
        order_id: OrderId,
        items: &[OrderItem],
    ) -> Result<ReservationId, ServiceError> {
        if let Some(existing) = self.by_order.get(&order_id) {
            return Ok(existing.clone());
        }

        let mut requested: HashMap<ProductId, u32> = HashMap::new();
        for item in items {
            let total = requested.entry(item.product_id).or_default();
            *total = total.saturating_add(item.quantity);
        }

        for (product_id, quantity) in &requested {
            if let Some(available) = self.stock.get(product_id)
                && available < quantity
            {
                return Err(ServiceError::Rejected(format!(
                    "insufficient stock for product {product_id}: requested {quantity}, available {available}"
                )));
            }
        }
        for (product_id, quantity) in &requested {
            if let Some(available) = self.stock.get_mut(product_id) {
                *available -= quantity;
            }
        }

        self.next_id += 1;
        let reservation_id = ReservationId::new(format!("RES-{:04}", self.next_id));
        self.reservations.insert(
            reservation_id.clone(),
            Reservation {
                order_id,
                items: requested.into_iter().collect(),
            },
        );
        self.by_order.insert(order_id, reservation_id.clone());
        Ok(reservation_id)
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(
        &self,
        ctx: &CallContext,
        order_id: OrderId,
        items: &[OrderItem],
    ) -> Result<ReservationId, ServiceError> {
        let latency = lock(&self.state).latency;
        ctx.bounded(async {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let mut state = lock(&self.state);
            state.reserve_calls += 1;
            match state.reserve_script.next() {
                Some(Scripted::Fail(error)) => Err(error),
                Some(Scripted::ApplyThenFail(error)) => {
                    state.apply_reserve(order_id, items)?;
                    Err(error)
                }
                None => state.apply_reserve(order_id, items),
            }
        })
        .await
    }

    async fn release(
        &self,
        _ctx: &CallContext,
        reservation_id: &ReservationId,
    ) -> Result<(), ServiceError> {
        let mut state = lock(&self.state);
        state.release_calls += 1;
        let lost_response = match state.release_script.next() {
            Some(Scripted::Fail(error)) => return Err(error),
            Some(Scripted::ApplyThenFail(error)) => Some(error),
            None => None,
        };

        if let Some(reservation) = state.reservations.remove(reservation_id) {
            for (product_id, quantity) in reservation.items {
                if let Some(available) = state.stock.get_mut(&product_id) {
                    *available = available.saturating_add(quantity);
                }
            }
            state.by_order.remove(&reservation.order_id);
        }
        state.released.push(reservation_id.clone());

        match lost_response {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::SecurityContext;
    use domain::Money;

    fn ctx() -> CallContext {
        CallContext::new(Duration::from_secs(1), SecurityContext::anonymous())
    }

    fn items(quantity: u32) -> Vec<OrderItem> {
        vec![OrderItem::new(1, quantity, Money::from_cents(1000))]
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let service = InMemoryInventoryService::new();
        service.set_stock(1, 5);

        let reservation_id = service.reserve(&ctx(), OrderId::new(), &items(2)).await.unwrap();
        assert_eq!(reservation_id.as_str(), "RES-0001");
        assert_eq!(service.stock(1), Some(3));
        assert!(service.has_reservation(&reservation_id));

        service.release(&ctx(), &reservation_id).await.unwrap();
        assert_eq!(service.reservation_count(), 0);
        assert_eq!(service.stock(1), Some(5));
    }

    #[tokio::test]
    async fn test_repeated_product_lines_are_checked_together() {
        let service = InMemoryInventoryService::new();
        service.set_stock(1, 1);
        let split = vec![
            OrderItem::new(1, 1, Money::from_cents(1000)),
            OrderItem::new(1, 1, Money::from_cents(1000)),
        ];

        let short = service.reserve(&ctx(), OrderId::new(), &split).await;
        assert!(matches!(short, Err(ServiceError::Rejected(_))));
        assert_eq!(service.stock(1), Some(1));
        assert_eq!(service.reservation_count(), 0);

        service.set_stock(1, 2);
        let reservation_id = service.reserve(&ctx(), OrderId::new(), &split).await.unwrap();
        assert_eq!(service.stock(1), Some(0));

        service.release(&ctx(), &reservation_id).await.unwrap();
        assert_eq!(service.stock(1), Some(2));
    }

    #[tokio::test]
    async fn test_reserve_is_idempotent_per_order() {
        let service = InMemoryInventoryService::new();
        let order_id = OrderId::new();

        let first = service.reserve(&ctx(), order_id, &items(1)).await.unwrap();
        let second = service.reserve(&ctx(), order_id, &items(1)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(service.reservation_count(), 1);
        assert_eq!(service.reserve_calls(), 2);
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_rejected() {
        let service = InMemoryInventoryService::new();
        service.set_stock(1, 1);

        let result = service.reserve(&ctx(), OrderId::new(), &items(2)).await;
        assert!(matches!(result, Err(ServiceError::Rejected(_))));
        assert_eq!(service.stock(1), Some(1));
        assert_eq!(service.reservation_count(), 0);
    }

    #[tokio::test]
    async fn test_release_unknown_reservation_succeeds() {
        let service = InMemoryInventoryService::new();
        let result = service
            .release(&ctx(), &ReservationId::new("RES-9999"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_lost_response_still_reserves() {
        let service = InMemoryInventoryService::new();
        service.lose_next_reserve_response();
        let order_id = OrderId::new();

        let result = service.reserve(&ctx(), order_id, &items(1)).await;
        assert!(matches!(result, Err(ServiceError::Unknown(_))));
        assert_eq!(service.reservation_count(), 1);

        // Retrying returns the reservation that was made
        let retried = service.reserve(&ctx(), order_id, &items(1)).await.unwrap();
        assert_eq!(retried.as_str(), "RES-0001");
    }

    #[tokio::test]
    async fn test_scripted_failures_run_in_order() {
        let service = InMemoryInventoryService::new();
        service.fail_next_reserve(ServiceError::Unavailable("down".into()));

        let first = service.reserve(&ctx(), OrderId::new(), &items(1)).await;
        assert!(matches!(first, Err(ServiceError::Unavailable(_))));
        let second = service.reserve(&ctx(), OrderId::new(), &items(1)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_latency_beyond_timeout_is_unavailable() {
        let service = InMemoryInventoryService::new();
        service.set_latency(Some(Duration::from_millis(200)));
        let ctx = CallContext::new(Duration::from_millis(10), SecurityContext::anonymous());

        let result = service.reserve(&ctx, OrderId::new(), &items(1)).await;
        assert!(matches!(result, Err(ServiceError::Unavailable(_))));
        assert_eq!(service.reservation_count(), 0);
    }
}
