use chrono::{DateTime, Utc};
use common::{IdempotencyKey, OrderId};
use domain::{Order, OrderStatus, SagaNote, SagaPhase, SagaState};
use serde::{Deserialize, Serialize};

/// Revision number of an order record.
///
/// A record is created at revision 1 and every mutation bumps it by 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the revision a freshly created record starts at.
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// What a history entry recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    /// The order and its saga were created.
    Created,

    /// The saga moved between phases (or stayed, recording an attempt).
    Phase {
        from: SagaPhase,
        to: SagaPhase,
        note: SagaNote,
    },

    /// The order status changed.
    Status { from: OrderStatus, to: OrderStatus },
}

/// One append-only entry in an order's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub revision: Revision,
    pub at: DateTime<Utc>,
    pub change: Change,
}

/// An order together with its saga state and history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order: Order,
    pub saga: SagaState,
    pub idempotency_key: IdempotencyKey,
    pub revision: Revision,
    pub history: Vec<HistoryEntry>,
}

impl OrderRecord {
    /// Creates the record for a freshly stored order.
    pub fn new(order: Order, idempotency_key: IdempotencyKey) -> Self {
        let at = order.created_at();
        Self {
            order,
            saga: SagaState::default(),
            idempotency_key,
            revision: Revision::first(),
            history: vec![HistoryEntry {
                revision: Revision::first(),
                at,
                change: Change::Created,
            }],
        }
    }

    pub fn id(&self) -> OrderId {
        self.order.id()
    }

    pub fn status(&self) -> OrderStatus {
        self.order.status()
    }

    pub fn phase(&self) -> SagaPhase {
        self.saga.phase
    }

    /// Returns true once the saga has nothing left to drive.
    pub fn is_settled(&self) -> bool {
        self.saga.phase.is_terminal()
    }

    pub fn requires_operator(&self) -> bool {
        self.order.status().requires_operator()
    }

    /// Bumps the revision and appends `change` to the history.
    pub(crate) fn record(&mut self, change: Change, at: DateTime<Utc>) -> Revision {
        self.revision = self.revision.next();
        self.history.push(HistoryEntry {
            revision: self.revision,
            at,
            change,
        });
        self.revision
    }
}
