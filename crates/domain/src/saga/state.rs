//! Per-order saga bookkeeping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ChargeId, Compensation, ReservationId, SagaAction, SagaNote, SagaPhase, SagaStep};

/// Saga progress stored alongside its order.
///
/// Only [`SagaState::apply`] mutates it, so the same sequence of
/// `(phase, note)` pairs always rebuilds the same state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SagaState {
    pub phase: SagaPhase,
    pub current_step: SagaStep,
    /// Applied reversible actions, in application order.
    pub compensations_pending: Vec<Compensation>,
    pub attempt_count: BTreeMap<SagaAction, u32>,
    pub last_error: Option<String>,
    pub reservation_id: Option<ReservationId>,
    pub charge_id: Option<ChargeId>,
    /// Set when a charge outcome was ambiguous and assumed to have happened.
    pub reconciliation_required: bool,
    /// Why the saga was cancelled or needs an operator.
    pub outcome_reason: Option<String>,
}

impl SagaState {
    /// Moves to `phase` and folds `note` into the state.
    pub fn apply(&mut self, phase: SagaPhase, note: &SagaNote) {
        self.phase = phase;

        match note {
            SagaNote::Started => {}
            SagaNote::AttemptFailed { action, error } => {
                self.count_attempt(*action);
                self.last_error = Some(error.clone());
            }
            SagaNote::InventoryReserved { reservation_id } => {
                self.count_attempt(SagaAction::ReserveInventory);
                self.reservation_id = Some(reservation_id.clone());
                self.compensations_pending
                    .push(Compensation::ReleaseInventory {
                        reservation_id: reservation_id.clone(),
                    });
                self.current_step = SagaStep::InventoryReserved;
            }
            SagaNote::PaymentCharged { charge_id } => {
                self.count_attempt(SagaAction::ChargePayment);
                match charge_id {
                    Some(charge_id) => {
                        self.charge_id = Some(charge_id.clone());
                        self.compensations_pending.push(Compensation::RefundPayment {
                            charge_id: charge_id.clone(),
                        });
                    }
                    None => self.reconciliation_required = true,
                }
                self.current_step = SagaStep::PaymentCharged;
            }
            SagaNote::Committed => {
                self.count_attempt(SagaAction::CommitOrder);
                // Nothing left to undo once the order is committed
                self.compensations_pending.clear();
                self.current_step = SagaStep::OrderCommitted;
            }
            SagaNote::Notified { delivered, .. } => {
                self.count_attempt(SagaAction::Notify);
                if !delivered {
                    self.last_error = Some("notification not delivered".to_string());
                }
                self.current_step = SagaStep::Notified;
            }
            SagaNote::CompensationStarted { reason } => {
                self.outcome_reason = Some(reason.to_string());
            }
            SagaNote::CompensationConfirmed { compensation } => {
                self.count_attempt(compensation.action());
                self.compensations_pending.retain(|c| c != compensation);
            }
            SagaNote::Cancelled { reason } => {
                self.outcome_reason = Some(reason.to_string());
            }
            SagaNote::CompensationFailed { reason } => {
                self.last_error = Some(reason.clone());
                self.outcome_reason = Some(reason.clone());
            }
        }
    }

    /// Returns how many attempts have been made for `action`.
    pub fn attempts(&self, action: SagaAction) -> u32 {
        self.attempt_count.get(&action).copied().unwrap_or(0)
    }

    /// Pending compensations, most recent first.
    pub fn unwind_order(&self) -> impl Iterator<Item = &Compensation> {
        self.compensations_pending.iter().rev()
    }

    fn count_attempt(&mut self, action: SagaAction) {
        *self.attempt_count.entry(action).or_insert(0) += 1;
    }
}
