//! Order aggregate store.
//!
//! Single point of truth for `(Order, SagaState)` pairs. Saga progress is
//! written through a compare-and-swap on the saga phase, and every
//! mutation is appended to a per-order history with a monotonically
//! increasing revision.

pub mod error;
pub mod memory;
pub mod record;
pub mod store;

pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use record::{Change, HistoryEntry, OrderRecord, Revision};
pub use store::{OrderStore, OrderStoreExt};
