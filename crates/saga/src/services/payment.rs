//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{ChargeId, Money};

use super::script::{Script, Scripted, lock};
use super::{CallContext, ServiceError};

/// Trait for payment operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges the customer for an order.
    ///
    /// The payment service deduplicates on the order id, so charging again
    /// for the same order returns the existing charge.
    async fn charge(
        &self,
        ctx: &CallContext,
        order_id: OrderId,
        user_id: UserId,
        amount: Money,
    ) -> Result<ChargeId, ServiceError>;

    /// Refunds a charge. Refunding an already refunded charge succeeds.
    async fn refund(&self, ctx: &CallContext, charge_id: &ChargeId) -> Result<(), ServiceError>;
}

#[async_trait]
impl<T: PaymentService + ?Sized> PaymentService for Arc<T> {
    async fn charge(
        &self,
        ctx: &CallContext,
        order_id: OrderId,
        user_id: UserId,
        amount: Money,
    ) -> Result<ChargeId, ServiceError> {
        (**self).charge(ctx, order_id, user_id, amount).await
    }

    async fn refund(&self, ctx: &CallContext, charge_id: &ChargeId) -> Result<(), ServiceError> {
        (**self).refund(ctx, charge_id).await
    }
}

#[derive(Debug, Clone)]
struct Charge {
    order_id: OrderId,
    amount: Money,
    refunded: bool,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    charges: HashMap<ChargeId, Charge>,
    by_order: HashMap<OrderId, ChargeId>,
    next_id: u32,
    charge_calls: usize,
    refund_calls: usize,
    refunds_applied: usize,
    charge_script: Script,
    refund_script: Script,
}

/// In-memory payment service.
///
/// Charges are deduplicated on order id. Failures can be scripted per
/// operation.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<Mutex<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next charge call fail with `error` without charging.
    pub fn fail_next_charge(&self, error: ServiceError) {
        lock(&self.state).charge_script.push(Scripted::Fail(error));
    }

    /// Makes every charge call fail with `error`, or clears it.
    pub fn fail_all_charges(&self, error: Option<ServiceError>) {
        lock(&self.state).charge_script.set_always(error);
    }

    /// Makes the next charge call take the money but answer `Unknown`.
    pub fn lose_next_charge_response(&self) {
        lock(&self.state)
            .charge_script
            .push(Scripted::ApplyThenFail(ServiceError::Unknown(
                "500 Internal Server Error".to_string(),
            )));
    }

    /// Makes the next refund call fail with `error` without refunding.
    pub fn fail_next_refund(&self, error: ServiceError) {
        lock(&self.state).refund_script.push(Scripted::Fail(error));
    }

    /// Makes every refund call fail with `error`, or clears it.
    pub fn fail_all_refunds(&self, error: Option<ServiceError>) {
        lock(&self.state).refund_script.set_always(error);
    }

    /// Returns the number of charges taken, refunded or not.
    pub fn charge_count(&self) -> usize {
        lock(&self.state).charges.len()
    }

    /// Returns the number of charges not refunded.
    pub fn active_charge_count(&self) -> usize {
        lock(&self.state)
            .charges
            .values()
            .filter(|c| !c.refunded)
            .count()
    }

    /// Returns the amount currently held for an order.
    pub fn charged_for(&self, order_id: OrderId) -> Money {
        let state = lock(&self.state);
        state
            .charges
            .values()
            .filter(|c| c.order_id == order_id && !c.refunded)
            .fold(Money::zero(), |total, c| {
                total.checked_add(c.amount).unwrap_or(total)
            })
    }

    /// Returns the number of charge calls received.
    pub fn charge_calls(&self) -> usize {
        lock(&self.state).charge_calls
    }

    /// Returns the number of refund calls received.
    pub fn refund_calls(&self) -> usize {
        lock(&self.state).refund_calls
    }

    /// Returns the number of refunds that actually returned money.
    pub fn refunds_applied(&self) -> usize {
        lock(&self.state).refunds_applied
    }
}

impl InMemoryPaymentState {
    fn apply_charge(&mut self, order_id: OrderId, amount: Money) -> ChargeId {
        if let Some(existing) = self.by_order.get(&order_id) {
            return existing.clone();
        }

        self.next_id += 1;
        let charge_id = ChargeId::new(format!("CHG-{:04}", self.next_id));
        self.charges.insert(
            charge_id.clone(),
            Charge {
                order_id,
                amount,
                refunded: false,
            },
        );
        self.by_order.insert(order_id, charge_id.clone());
        charge_id
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        _ctx: &CallContext,
        order_id: OrderId,
        _user_id: UserId,
        amount: Money,
    ) -> Result<ChargeId, ServiceError> {
        let mut state = lock(&self.state);
        state.charge_calls += 1;
        match state.charge_script.next() {
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::ApplyThenFail(error)) => {
                state.apply_charge(order_id, amount);
                Err(error)
            }
            None => Ok(state.apply_charge(order_id, amount)),
        }
    }

    async fn refund(&self, _ctx: &CallContext, charge_id: &ChargeId) -> Result<(), ServiceError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.refund_calls += 1;
        if let Some(Scripted::Fail(error) | Scripted::ApplyThenFail(error)) =
            state.refund_script.next()
        {
            return Err(error);
        }

        let Some(charge) = state.charges.get_mut(charge_id) else {
            return Err(ServiceError::Rejected(format!("unknown charge {charge_id}")));
        };
        if !charge.refunded {
            charge.refunded = true;
            state.refunds_applied += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::services::SecurityContext;

    fn ctx() -> CallContext {
        CallContext::new(Duration::from_secs(1), SecurityContext::anonymous())
    }

    #[tokio::test]
    async fn test_charge_and_refund() {
        let service = InMemoryPaymentService::new();
        let order_id = OrderId::new();

        let charge_id = service
            .charge(&ctx(), order_id, UserId::new(1), Money::from_cents(5000))
            .await
            .unwrap();
        assert_eq!(charge_id.as_str(), "CHG-0001");
        assert_eq!(service.charged_for(order_id), Money::from_cents(5000));

        service.refund(&ctx(), &charge_id).await.unwrap();
        assert_eq!(service.charged_for(order_id), Money::zero());
        assert_eq!(service.active_charge_count(), 0);
    }

    #[tokio::test]
    async fn test_charge_is_deduplicated_on_order() {
        let service = InMemoryPaymentService::new();
        let order_id = OrderId::new();
        let amount = Money::from_cents(1000);

        let first = service.charge(&ctx(), order_id, UserId::new(1), amount).await.unwrap();
        let second = service.charge(&ctx(), order_id, UserId::new(1), amount).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(service.charge_count(), 1);
        assert_eq!(service.charge_calls(), 2);
    }

    #[tokio::test]
    async fn test_refund_twice_returns_money_once() {
        let service = InMemoryPaymentService::new();
        let charge_id = service
            .charge(&ctx(), OrderId::new(), UserId::new(1), Money::from_cents(1000))
            .await
            .unwrap();

        service.refund(&ctx(), &charge_id).await.unwrap();
        service.refund(&ctx(), &charge_id).await.unwrap();

        assert_eq!(service.refund_calls(), 2);
        assert_eq!(service.refunds_applied(), 1);
    }

    #[tokio::test]
    async fn test_declined_charge_takes_nothing() {
        let service = InMemoryPaymentService::new();
        service.fail_next_charge(ServiceError::Rejected("card declined".into()));

        let result = service
            .charge(&ctx(), OrderId::new(), UserId::new(1), Money::from_cents(1000))
            .await;
        assert_eq!(result, Err(ServiceError::Rejected("card declined".into())));
        assert_eq!(service.charge_count(), 0);
    }

    #[tokio::test]
    async fn test_lost_charge_response_still_charges() {
        let service = InMemoryPaymentService::new();
        service.lose_next_charge_response();
        let order_id = OrderId::new();

        let result = service
            .charge(&ctx(), order_id, UserId::new(1), Money::from_cents(1000))
            .await;
        assert!(matches!(result, Err(ServiceError::Unknown(_))));
        assert_eq!(service.charged_for(order_id), Money::from_cents(1000));
    }
}
