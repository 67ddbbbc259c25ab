//! Compensation engine: undoes the steps a saga has applied.
//!
//! Compensations are unwound most recent first, so a refund always runs
//! before the release of the stock it paid for. Each confirmed compensation
//! is removed from the pending list through the store, which makes running
//! the engine again after a crash safe.

use common::OrderId;
use domain::{Compensation, SagaNote, SagaPhase};
use order_store::OrderStore;

use crate::error::{Result, SagaError};
use crate::retry::{RetryPolicy, persist};
use crate::services::{CallContext, InventoryService, PaymentService, ServiceError, count_failure};

/// Outcome of one compensation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationReport {
    /// Compensations confirmed by the remote service during this run.
    pub confirmed: Vec<Compensation>,

    /// Compensations that could not be confirmed, with the last error seen.
    pub failed: Vec<(Compensation, ServiceError)>,
}

impl CompensationReport {
    /// Returns true if nothing is left to undo.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Describes the failed compensations for the operator.
    pub fn failure_summary(&self) -> String {
        self.failed
            .iter()
            .map(|(compensation, err)| format!("could not {compensation}: {err}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Issues release and refund calls for a compensating saga.
pub struct CompensationEngine<'a, S, I, P> {
    store: &'a S,
    inventory: &'a I,
    payment: &'a P,
    policy: RetryPolicy,
}

impl<'a, S, I, P> CompensationEngine<'a, S, I, P>
where
    S: OrderStore,
    I: InventoryService,
    P: PaymentService,
{
    pub fn new(store: &'a S, inventory: &'a I, payment: &'a P, policy: RetryPolicy) -> Self {
        Self {
            store,
            inventory,
            payment,
            policy,
        }
    }

    /// Unwinds every pending compensation of the order's saga.
    ///
    /// The saga must be in `Compensating`. A compensation that cannot be
    /// confirmed does not stop the others from running; it is reported in
    /// [`CompensationReport::failed`] and stays pending.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn run(&self, ctx: &CallContext, order_id: OrderId) -> Result<CompensationReport> {
        let record = self
            .store
            .get(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))?;

        if record.phase() != SagaPhase::Compensating {
            return Err(SagaError::CompensationNotAllowed {
                order_id,
                phase: record.phase(),
            });
        }

        let pending: Vec<Compensation> = record.saga.unwind_order().cloned().collect();
        tracing::info!(pending = pending.len(), "compensation started");

        let mut report = CompensationReport::default();
        for compensation in pending {
            match self.compensate(ctx, order_id, &compensation).await? {
                Ok(()) => report.confirmed.push(compensation),
                Err(err) => report.failed.push((compensation, err)),
            }
        }

        Ok(report)
    }

    /// Retries one compensation until it is confirmed, refused or out of
    /// attempts. The outer error is a store failure; the inner one is the
    /// last remote failure.
    async fn compensate(
        &self,
        ctx: &CallContext,
        order_id: OrderId,
        compensation: &Compensation,
    ) -> Result<std::result::Result<(), ServiceError>> {
        let action = compensation.action();
        let mut delays = self.policy.delays();

        loop {
            let result = match compensation {
                Compensation::ReleaseInventory { reservation_id } => {
                    ctx.bounded(self.inventory.release(ctx, reservation_id))
                        .await
                }
                Compensation::RefundPayment { charge_id } => {
                    ctx.bounded(self.payment.refund(ctx, charge_id)).await
                }
            };

            let err = match result {
                Ok(()) => {
                    self.record(
                        order_id,
                        SagaNote::CompensationConfirmed {
                            compensation: compensation.clone(),
                        },
                    )
                    .await?;
                    metrics::counter!("compensations_total", "action" => action.as_str(), "outcome" => "confirmed")
                        .increment(1);
                    tracing::info!(%compensation, "compensation confirmed");
                    return Ok(Ok(()));
                }
                Err(err) => err,
            };

            count_failure(action, &err);
            tracing::warn!(%compensation, kind = err.kind(), error = %err, "compensation attempt failed");
            self.record(
                order_id,
                SagaNote::AttemptFailed {
                    action,
                    error: err.to_string(),
                },
            )
            .await?;

            let delay = match err {
                ServiceError::Rejected(_) => None,
                _ => delays.next(),
            };
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    metrics::counter!("compensations_total", "action" => action.as_str(), "outcome" => "failed")
                        .increment(1);
                    return Ok(Err(err));
                }
            }
        }
    }

    async fn record(&self, order_id: OrderId, note: SagaNote) -> Result<()> {
        persist(&self.policy, note.kind(), || {
            self.store.advance_state(
                order_id,
                SagaPhase::Compensating,
                SagaPhase::Compensating,
                note.clone(),
            )
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{IdempotencyKey, UserId};
    use domain::{CancelReason, Money, NewOrder, OrderItem, SagaAction};
    use order_store::{InMemoryOrderStore, OrderStoreExt};

    use super::*;
    use crate::services::{InMemoryInventoryService, InMemoryPaymentService, SecurityContext};

    struct Fixture {
        store: InMemoryOrderStore,
        inventory: InMemoryInventoryService,
        payment: InMemoryPaymentService,
        ctx: CallContext,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: InMemoryOrderStore::new(),
                inventory: InMemoryInventoryService::new(),
                payment: InMemoryPaymentService::new(),
                ctx: CallContext::new(Duration::from_secs(1), SecurityContext::anonymous()),
            }
        }

        fn engine(&self) -> CompensationEngine<'_, InMemoryOrderStore, InMemoryInventoryService, InMemoryPaymentService> {
            let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
            CompensationEngine::new(&self.store, &self.inventory, &self.payment, policy)
        }

        /// Reserves and charges for real, then records the saga as
        /// compensating after a charge.
        async fn charged_then_compensating(&self) -> OrderId {
            let items = vec![OrderItem::new(1u64, 2, Money::from_cents(1000))];
            let order = NewOrder::new(UserId::new(7), items.clone(), "1 Main St").unwrap();
            let total = order.total_amount();
            let order_id = self
                .store
                .create(order, IdempotencyKey::new("comp-key"))
                .await
                .unwrap();

            let reservation_id = self.inventory.reserve(&self.ctx, order_id, &items).await.unwrap();
            let charge_id = self
                .payment
                .charge(&self.ctx, order_id, UserId::new(7), total)
                .await
                .unwrap();

            let steps = [
                (SagaPhase::Pending, SagaPhase::Reserving, SagaNote::Started),
                (
                    SagaPhase::Reserving,
                    SagaPhase::Reserved,
                    SagaNote::InventoryReserved { reservation_id },
                ),
                (SagaPhase::Reserved, SagaPhase::Charging, SagaNote::Started),
                (
                    SagaPhase::Charging,
                    SagaPhase::Charged,
                    SagaNote::PaymentCharged {
                        charge_id: Some(charge_id),
                    },
                ),
                (
                    SagaPhase::Charged,
                    SagaPhase::Compensating,
                    SagaNote::CompensationStarted {
                        reason: CancelReason::Interrupted,
                    },
                ),
            ];
            for (from, to, note) in steps {
                self.store.advance_state(order_id, from, to, note).await.unwrap();
            }
            order_id
        }
    }

    #[tokio::test]
    async fn test_unwinds_refund_before_release() {
        let fx = Fixture::new();
        let order_id = fx.charged_then_compensating().await;

        let report = fx.engine().run(&fx.ctx, order_id).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.confirmed.len(), 2);
        assert_eq!(report.confirmed[0].action(), SagaAction::RefundPayment);
        assert_eq!(report.confirmed[1].action(), SagaAction::ReleaseInventory);
        assert_eq!(fx.payment.refunds_applied(), 1);
        assert_eq!(fx.inventory.reservation_count(), 0);

        let record = fx.store.require(order_id).await.unwrap();
        assert!(record.saga.compensations_pending.is_empty());
        assert_eq!(record.phase(), SagaPhase::Compensating);
    }

    #[tokio::test]
    async fn test_second_run_does_not_refund_again() {
        let fx = Fixture::new();
        let order_id = fx.charged_then_compensating().await;

        let first = fx.engine().run(&fx.ctx, order_id).await.unwrap();
        let after_first = fx.store.require(order_id).await.unwrap();
        let second = fx.engine().run(&fx.ctx, order_id).await.unwrap();
        let after_second = fx.store.require(order_id).await.unwrap();

        assert!(first.is_complete());
        assert!(second.confirmed.is_empty());
        assert!(second.is_complete());
        assert_eq!(fx.payment.refund_calls(), 1);
        assert_eq!(fx.inventory.release_calls(), 1);
        assert_eq!(after_first.saga, after_second.saga);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let fx = Fixture::new();
        let order_id = fx.charged_then_compensating().await;
        fx.payment
            .fail_next_refund(ServiceError::Unavailable("timeout".into()));

        let report = fx.engine().run(&fx.ctx, order_id).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(fx.payment.refund_calls(), 2);
        let record = fx.store.require(order_id).await.unwrap();
        assert_eq!(record.saga.attempts(SagaAction::RefundPayment), 2);
    }

    #[tokio::test]
    async fn test_unconfirmed_compensation_does_not_stop_the_rest() {
        let fx = Fixture::new();
        let order_id = fx.charged_then_compensating().await;
        fx.payment
            .fail_all_refunds(Some(ServiceError::Unavailable("down".into())));

        let report = fx.engine().run(&fx.ctx, order_id).await.unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.action(), SagaAction::RefundPayment);
        assert!(report.failure_summary().contains("refund charge"));
        assert_eq!(fx.payment.refund_calls(), 3);
        // Release still ran
        assert_eq!(fx.inventory.release_calls(), 1);

        let record = fx.store.require(order_id).await.unwrap();
        assert_eq!(record.saga.compensations_pending.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_compensation_is_not_retried() {
        let fx = Fixture::new();
        let order_id = fx.charged_then_compensating().await;
        fx.payment
            .fail_next_refund(ServiceError::Rejected("charge not found".into()));

        let report = fx.engine().run(&fx.ctx, order_id).await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(fx.payment.refund_calls(), 1);
    }

    #[tokio::test]
    async fn test_requires_compensating_phase() {
        let fx = Fixture::new();
        let order = NewOrder::new(
            UserId::new(1),
            vec![OrderItem::new(1u64, 1, Money::from_cents(100))],
            "addr",
        )
        .unwrap();
        let order_id = fx
            .store
            .create(order, IdempotencyKey::new("not-compensating"))
            .await
            .unwrap();

        let result = fx.engine().run(&fx.ctx, order_id).await;
        assert!(matches!(
            result,
            Err(SagaError::CompensationNotAllowed {
                phase: SagaPhase::Pending,
                ..
            })
        ));
        assert_eq!(fx.inventory.release_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let fx = Fixture::new();
        let result = fx.engine().run(&fx.ctx, OrderId::new()).await;
        assert!(matches!(result, Err(SagaError::OrderNotFound(_))));
    }
}
