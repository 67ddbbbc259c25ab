//! Saga coordinator for the order creation workflow.
//!
//! The coordinator drives one order through reserve, charge, commit and
//! notify. Every step re-reads the record and acts on the stored phase, so
//! the same loop serves a fresh order and one resumed after a restart.

use std::time::Instant;

use common::{IdempotencyKey, OrderId, UserId};
use domain::{
    CancelReason, NewOrder, OrderItem, OrderStatus, SagaAction, SagaNote, SagaPhase,
};
use order_store::{
    Change, HistoryEntry, OrderRecord, OrderStore, OrderStoreError, OrderStoreExt, Revision,
};

use crate::cancel::CancelToken;
use crate::compensation::CompensationEngine;
use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::retry::persist;
use crate::services::{
    CallContext, InventoryService, Notification, NotificationService, PaymentService,
    SecurityContext, ServiceError, count_failure,
};

/// A request to create an order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub shipping_address: String,
    pub idempotency_key: IdempotencyKey,
    pub security: SecurityContext,
    pub cancel: CancelToken,
}

impl CreateOrder {
    pub fn new(
        user_id: UserId,
        items: Vec<OrderItem>,
        shipping_address: impl Into<String>,
        idempotency_key: IdempotencyKey,
    ) -> Self {
        Self {
            user_id,
            items,
            shipping_address: shipping_address.into(),
            idempotency_key,
            security: SecurityContext::anonymous(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_security(mut self, security: SecurityContext) -> Self {
        self.security = security;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// The record a create request resolved to.
#[derive(Debug, Clone)]
pub struct OrderPlacement {
    pub record: OrderRecord,
    /// True if the idempotency key matched an existing order and no saga
    /// was started.
    pub replayed: bool,
}

/// Orchestrates order creation sagas.
///
/// Steps run strictly one after another. Remote failures are classified
/// and resolved into a terminal phase; only validation, idempotency and
/// store errors reach the caller.
pub struct SagaCoordinator<S, I, P, N> {
    store: S,
    inventory: I,
    payment: P,
    notifier: N,
    config: SagaConfig,
}

impl<S, I, P, N> SagaCoordinator<S, I, P, N>
where
    S: OrderStore,
    I: InventoryService,
    P: PaymentService,
    N: NotificationService,
{
    /// Creates a new saga coordinator.
    pub fn new(store: S, inventory: I, payment: P, notifier: N, config: SagaConfig) -> Self {
        Self {
            store,
            inventory,
            payment,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Creates an order and drives its saga to a terminal phase.
    ///
    /// A request whose idempotency key is already known returns the existing
    /// record, in flight or terminal, without starting a second saga.
    #[tracing::instrument(
        skip(self, request),
        fields(user_id = %request.user_id, idempotency_key = %request.idempotency_key)
    )]
    pub async fn create_order(&self, request: CreateOrder) -> Result<OrderPlacement> {
        let CreateOrder {
            user_id,
            items,
            shipping_address,
            idempotency_key,
            security,
            cancel,
        } = request;

        if idempotency_key.is_blank() {
            return Err(SagaError::MissingIdempotencyKey);
        }
        let new_order = NewOrder::new(user_id, items, shipping_address)?;

        if let Some(existing) = self.store.find_by_idempotency_key(&idempotency_key).await? {
            return self.replay(existing, &new_order);
        }

        let order_id = match self
            .store
            .create(new_order.clone(), idempotency_key)
            .await
        {
            Ok(order_id) => order_id,
            // Lost the race against a concurrent request with the same key
            Err(OrderStoreError::Conflict { existing, .. }) => {
                let record = self.store.require(existing).await?;
                return self.replay(record, &new_order);
            }
            Err(err) => return Err(err.into()),
        };

        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = Instant::now();
        tracing::info!(%order_id, total = %new_order.total_amount(), "saga started");

        let ctx = CallContext::new(self.config.call_timeout, security);
        self.drive(&ctx, order_id, &cancel).await?;

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);

        let record = self.store.require(order_id).await?;
        tracing::info!(%order_id, phase = %record.phase(), status = %record.status(), duration, "saga finished");
        Ok(OrderPlacement {
            record,
            replayed: false,
        })
    }

    /// Retrieves an order record.
    pub async fn get_order(&self, order_id: OrderId) -> Result<OrderRecord> {
        self.store
            .get(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))
    }

    /// Lists every order, oldest first.
    pub async fn list_orders(&self) -> Result<Vec<OrderRecord>> {
        Ok(self.store.list().await?)
    }

    /// Returns the audit trail of an order.
    pub async fn history(&self, order_id: OrderId) -> Result<Vec<HistoryEntry>> {
        Ok(self.get_order(order_id).await?.history)
    }

    /// Moves a confirmed order through fulfillment.
    ///
    /// Only `processing`, `shipped` and `delivered` can be set, and only
    /// forward. Setting a stage the order has already reached changes
    /// nothing.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, order_id: OrderId, status: OrderStatus) -> Result<OrderRecord> {
        if !status.is_fulfillment() {
            return Err(SagaError::StatusNotSettable(status));
        }
        let record = self.get_order(order_id).await?;
        let current = record.status();
        if current.has_reached(status) {
            return Ok(record);
        }
        if !current.can_transition_to(status) {
            return Err(SagaError::StatusTransitionNotAllowed {
                order_id,
                from: current,
                to: status,
            });
        }

        self.store.set_final_status(order_id, status).await?;
        metrics::counter!("order_status_updates_total", "status" => status.as_str()).increment(1);
        tracing::info!(%order_id, from = %current, to = %status, "order status updated");
        self.get_order(order_id).await
    }

    /// Drives an interrupted saga to a terminal phase.
    ///
    /// Before the charge the saga is rolled back: a pending order is
    /// cancelled, a reserved one compensated, and one interrupted mid
    /// reservation handed to an operator since its reservation id was never
    /// learned. From the charge onwards it rolls forward, assuming an
    /// interrupted charge went through.
    #[tracing::instrument(skip(self, security))]
    pub async fn resume(
        &self,
        order_id: OrderId,
        security: SecurityContext,
    ) -> Result<OrderRecord> {
        let record = self.get_order(order_id).await?;
        let ctx = CallContext::new(self.config.call_timeout, security);
        tracing::info!(phase = %record.phase(), "resuming saga");

        let prepared = match record.phase() {
            SagaPhase::Pending => {
                self.finish_cancelled(&ctx, &record, SagaPhase::Pending, CancelReason::Interrupted)
                    .await
            }
            SagaPhase::Reserving => {
                self.fail_saga(
                    &record,
                    SagaPhase::Reserving,
                    "interrupted while reserving inventory; reservation outcome unknown"
                        .to_string(),
                )
                .await
            }
            SagaPhase::Reserved => {
                self.start_compensation(order_id, SagaPhase::Reserved, CancelReason::Interrupted)
                    .await
            }
            SagaPhase::Charging => {
                tracing::warn!("interrupted while charging, assuming the charge went through");
                self.assume_charged(order_id).await
            }
            _ => Ok(()),
        };
        match prepared {
            Ok(()) => {}
            Err(err) if err.is_stale_state() => return self.get_order(order_id).await,
            Err(err) => return Err(err),
        }

        self.drive(&ctx, order_id, &CancelToken::new()).await?;
        self.get_order(order_id).await
    }

    /// Resumes every saga that has not reached a terminal phase.
    ///
    /// A saga that fails to resume is logged and skipped.
    pub async fn resume_pending(&self, security: SecurityContext) -> Result<Vec<OrderRecord>> {
        let in_flight = self.store.list_in_flight().await?;
        if !in_flight.is_empty() {
            tracing::info!(count = in_flight.len(), "resuming in-flight sagas");
        }

        let mut resumed = Vec::with_capacity(in_flight.len());
        for record in in_flight {
            let order_id = record.id();
            match self.resume(order_id, security.clone()).await {
                Ok(record) => resumed.push(record),
                Err(err) => tracing::error!(%order_id, error = %err, "failed to resume saga"),
            }
        }
        Ok(resumed)
    }

    fn replay(&self, record: OrderRecord, request: &NewOrder) -> Result<OrderPlacement> {
        if !record.order.matches_request(request) {
            return Err(SagaError::IdempotencyKeyReused {
                key: record.idempotency_key.clone(),
                existing: record.id(),
            });
        }

        metrics::counter!("saga_idempotent_replays_total").increment(1);
        tracing::info!(order_id = %record.id(), phase = %record.phase(), "idempotent replay");
        Ok(OrderPlacement {
            record,
            replayed: true,
        })
    }

    /// Runs steps until the saga is terminal or another driver takes over.
    async fn drive(&self, ctx: &CallContext, order_id: OrderId, cancel: &CancelToken) -> Result<()> {
        loop {
            let record = self.store.require(order_id).await?;

            let step = match record.phase() {
                SagaPhase::Pending => self.begin(ctx, &record, cancel).await,
                SagaPhase::Reserving => self.reserve_inventory(ctx, &record, cancel).await,
                SagaPhase::Reserved => {
                    self.advance(order_id, SagaPhase::Reserved, SagaPhase::Charging, SagaNote::Started)
                        .await
                        .map(drop)
                }
                SagaPhase::Charging => self.charge_payment(ctx, &record).await,
                SagaPhase::Charged => self.commit(&record).await,
                SagaPhase::Committed => self.notify_confirmed(ctx, &record).await,
                SagaPhase::Compensating => self.compensate(ctx, &record).await,
                phase @ (SagaPhase::Notified
                | SagaPhase::Cancelled
                | SagaPhase::CompensationFailed) => {
                    // Repairs a status write lost before a restart
                    self.set_status(order_id, phase.order_status()).await?;
                    return Ok(());
                }
            };

            match step {
                Ok(()) => {}
                Err(err) if err.is_stale_state() => {
                    tracing::info!(%order_id, "saga advanced by another driver, stopping");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn begin(&self, ctx: &CallContext, record: &OrderRecord, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return self
                .finish_cancelled(ctx, record, SagaPhase::Pending, CancelReason::ClientCancelled)
                .await;
        }
        self.advance(record.id(), SagaPhase::Pending, SagaPhase::Reserving, SagaNote::Started)
            .await?;
        Ok(())
    }

    async fn reserve_inventory(
        &self,
        ctx: &CallContext,
        record: &OrderRecord,
        cancel: &CancelToken,
    ) -> Result<()> {
        let order_id = record.id();
        let mut delays = self.config.forward_retry.delays();
        let mut outcome_unknown = false;

        loop {
            // After an ambiguous answer stock may be held, so the client can
            // no longer walk away for free.
            if cancel.is_cancelled() && !outcome_unknown {
                return self
                    .finish_cancelled(ctx, record, SagaPhase::Reserving, CancelReason::ClientCancelled)
                    .await;
            }

            let result = ctx
                .bounded(self.inventory.reserve(ctx, order_id, record.order.items()))
                .await;
            match result {
                Ok(reservation_id) => {
                    tracing::info!(%order_id, %reservation_id, "inventory reserved");
                    self.advance(
                        order_id,
                        SagaPhase::Reserving,
                        SagaPhase::Reserved,
                        SagaNote::InventoryReserved { reservation_id },
                    )
                    .await?;
                    return Ok(());
                }
                Err(err) => {
                    self.record_attempt(order_id, SagaPhase::Reserving, SagaAction::ReserveInventory, &err)
                        .await?;
                    match err {
                        ServiceError::Rejected(reason) => {
                            return self
                                .finish_cancelled(
                                    ctx,
                                    record,
                                    SagaPhase::Reserving,
                                    CancelReason::InventoryRejected(reason),
                                )
                                .await;
                        }
                        ServiceError::Unknown(_) => outcome_unknown = true,
                        ServiceError::Unavailable(_) => {}
                    }
                }
            }

            match delays.next() {
                Some(delay) => tokio::time::sleep(delay).await,
                None if outcome_unknown => {
                    return self
                        .fail_saga(
                            record,
                            SagaPhase::Reserving,
                            "inventory reservation outcome unknown after retries".to_string(),
                        )
                        .await;
                }
                None => {
                    return self
                        .finish_cancelled(
                            ctx,
                            record,
                            SagaPhase::Reserving,
                            CancelReason::InventoryUnreachable,
                        )
                        .await;
                }
            }
        }
    }

    async fn charge_payment(&self, ctx: &CallContext, record: &OrderRecord) -> Result<()> {
        let order_id = record.id();
        let mut delays = self.config.forward_retry.delays();

        loop {
            let result = ctx
                .bounded(self.payment.charge(
                    ctx,
                    order_id,
                    record.order.user_id(),
                    record.order.total_amount(),
                ))
                .await;
            match result {
                Ok(charge_id) => {
                    tracing::info!(%order_id, %charge_id, "payment charged");
                    self.advance(
                        order_id,
                        SagaPhase::Charging,
                        SagaPhase::Charged,
                        SagaNote::PaymentCharged {
                            charge_id: Some(charge_id),
                        },
                    )
                    .await?;
                    return Ok(());
                }
                Err(err) => {
                    self.record_attempt(order_id, SagaPhase::Charging, SagaAction::ChargePayment, &err)
                        .await?;
                    match err {
                        ServiceError::Rejected(reason) => {
                            return self
                                .start_compensation(
                                    order_id,
                                    SagaPhase::Charging,
                                    CancelReason::PaymentRejected(reason),
                                )
                                .await;
                        }
                        ServiceError::Unknown(_) => {
                            tracing::warn!(%order_id, "charge outcome unknown, assuming charged");
                            return self.assume_charged(order_id).await;
                        }
                        ServiceError::Unavailable(_) => {}
                    }
                }
            }

            match delays.next() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return self
                        .start_compensation(
                            order_id,
                            SagaPhase::Charging,
                            CancelReason::PaymentUnreachable,
                        )
                        .await;
                }
            }
        }
    }

    /// Moves to `Charged` without a charge id, flagging the order for
    /// reconciliation.
    async fn assume_charged(&self, order_id: OrderId) -> Result<()> {
        self.advance(
            order_id,
            SagaPhase::Charging,
            SagaPhase::Charged,
            SagaNote::PaymentCharged { charge_id: None },
        )
        .await?;
        metrics::counter!("saga_reconciliation_required_total").increment(1);
        Ok(())
    }

    /// Commits the order as confirmed. Money has moved, so store failures
    /// are ridden out rather than reported.
    async fn commit(&self, record: &OrderRecord) -> Result<()> {
        let order_id = record.id();
        self.set_status(order_id, OrderStatus::Confirmed).await?;
        self.advance(order_id, SagaPhase::Charged, SagaPhase::Committed, SagaNote::Committed)
            .await?;

        let total = record.order.total_amount();
        metrics::counter!("saga_confirmed_total").increment(1);
        metrics::counter!("order_revenue_cents_total")
            .increment(u64::try_from(total.cents()).unwrap_or(0));
        tracing::info!(
            %order_id,
            %total,
            reconciliation_required = record.saga.reconciliation_required,
            "order confirmed"
        );
        Ok(())
    }

    async fn notify_confirmed(&self, ctx: &CallContext, record: &OrderRecord) -> Result<()> {
        let notification = Notification::order_confirmed(record.order.user_id(), record.id());
        let delivered = self.send_notification(ctx, &notification).await;
        self.advance(
            record.id(),
            SagaPhase::Committed,
            SagaPhase::Notified,
            SagaNote::Notified {
                kind: notification.kind,
                delivered,
            },
        )
        .await?;
        Ok(())
    }

    async fn start_compensation(
        &self,
        order_id: OrderId,
        from: SagaPhase,
        reason: CancelReason,
    ) -> Result<()> {
        tracing::warn!(%order_id, %reason, "saga compensating");
        self.advance(
            order_id,
            from,
            SagaPhase::Compensating,
            SagaNote::CompensationStarted { reason },
        )
        .await?;
        Ok(())
    }

    async fn compensate(&self, ctx: &CallContext, record: &OrderRecord) -> Result<()> {
        let engine = CompensationEngine::new(
            &self.store,
            &self.inventory,
            &self.payment,
            self.config.compensation_retry,
        );
        let report = engine.run(ctx, record.id()).await?;

        if report.is_complete() {
            let reason = compensation_reason(record).unwrap_or(CancelReason::Interrupted);
            self.finish_cancelled(ctx, record, SagaPhase::Compensating, reason)
                .await
        } else {
            self.fail_saga(record, SagaPhase::Compensating, report.failure_summary())
                .await
        }
    }

    async fn finish_cancelled(
        &self,
        ctx: &CallContext,
        record: &OrderRecord,
        from: SagaPhase,
        reason: CancelReason,
    ) -> Result<()> {
        let order_id = record.id();
        self.advance(
            order_id,
            from,
            SagaPhase::Cancelled,
            SagaNote::Cancelled {
                reason: reason.clone(),
            },
        )
        .await?;
        self.set_status(order_id, OrderStatus::Cancelled).await?;

        metrics::counter!("saga_cancelled_total").increment(1);
        tracing::warn!(%order_id, %reason, "order cancelled");

        // The client that walked away is not told about it
        if reason != CancelReason::ClientCancelled {
            let notification =
                Notification::order_cancelled(record.order.user_id(), order_id, &reason);
            self.send_notification(ctx, &notification).await;
        }
        Ok(())
    }

    async fn fail_saga(&self, record: &OrderRecord, from: SagaPhase, reason: String) -> Result<()> {
        let order_id = record.id();
        self.advance(
            order_id,
            from,
            SagaPhase::CompensationFailed,
            SagaNote::CompensationFailed {
                reason: reason.clone(),
            },
        )
        .await?;
        self.set_status(order_id, OrderStatus::Failed).await?;

        metrics::counter!("saga_compensation_failed_total").increment(1);
        tracing::error!(%order_id, %reason, "saga needs operator intervention");
        Ok(())
    }

    /// Sends one notification attempt. Returns true if it was delivered.
    async fn send_notification(&self, ctx: &CallContext, notification: &Notification) -> bool {
        match ctx.bounded(self.notifier.notify(ctx, notification)).await {
            Ok(()) => true,
            Err(err) => {
                count_failure(SagaAction::Notify, &err);
                tracing::warn!(
                    order_id = %notification.order_id,
                    kind = %notification.kind,
                    error = %err,
                    "notification not delivered"
                );
                false
            }
        }
    }

    async fn record_attempt(
        &self,
        order_id: OrderId,
        phase: SagaPhase,
        action: SagaAction,
        err: &ServiceError,
    ) -> Result<()> {
        count_failure(action, err);
        tracing::warn!(%order_id, %action, kind = err.kind(), error = %err, "remote call failed");
        self.advance(
            order_id,
            phase,
            phase,
            SagaNote::AttemptFailed {
                action,
                error: err.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn advance(
        &self,
        order_id: OrderId,
        from: SagaPhase,
        to: SagaPhase,
        note: SagaNote,
    ) -> Result<Revision> {
        let kind = note.kind();
        let revision = persist(&self.config.forward_retry, kind, || {
            self.store.advance_state(order_id, from, to, note.clone())
        })
        .await?;
        tracing::debug!(%order_id, %from, %to, note = kind, %revision, "saga state recorded");
        Ok(revision)
    }

    async fn set_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Revision> {
        Ok(persist(&self.config.forward_retry, "set_final_status", || {
            self.store.set_final_status(order_id, status)
        })
        .await?)
    }
}

/// Returns the reason the saga last started compensating for.
fn compensation_reason(record: &OrderRecord) -> Option<CancelReason> {
    record.history.iter().rev().find_map(|entry| match &entry.change {
        Change::Phase {
            note: SagaNote::CompensationStarted { reason },
            ..
        } => Some(reason.clone()),
        _ => None,
    })
}
