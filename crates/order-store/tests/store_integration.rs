//! Integration tests for the in-memory order store.
//!
//! These tests exercise the store the way concurrent saga drivers do:
//! racing creates on one idempotency key and racing compare-and-swap
//! writes on one saga.

use std::sync::Arc;

use common::{IdempotencyKey, UserId};
use domain::{
    Money, NewOrder, OrderItem, OrderStatus, ReservationId, SagaAction, SagaNote, SagaPhase,
};
use order_store::{Change, InMemoryOrderStore, OrderStore, OrderStoreError, OrderStoreExt};
use tokio::sync::Barrier;

fn new_order(user: u64) -> NewOrder {
    NewOrder::new(
        UserId::new(user),
        vec![OrderItem::new(1, 2, Money::from_cents(1000))],
        "1 Main St",
    )
    .unwrap()
}

#[tokio::test]
async fn concurrent_advance_has_exactly_one_winner() {
    let store = InMemoryOrderStore::new();
    let order_id = store
        .create(new_order(1), IdempotencyKey::new("race"))
        .await
        .unwrap();

    let drivers = 8;
    let barrier = Arc::new(Barrier::new(drivers));
    let mut handles = Vec::new();
    for _ in 0..drivers {
        let store = store.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            store
                .advance_state(order_id, SagaPhase::Pending, SagaPhase::Reserving, SagaNote::Started)
                .await
        }));
    }

    let mut won = 0;
    let mut stale = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(OrderStoreError::StaleState { actual, .. }) => {
                assert_eq!(actual, SagaPhase::Reserving);
                stale += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(stale, drivers - 1);
    let record = store.require(order_id).await.unwrap();
    assert_eq!(record.history.len(), 2);
}

#[tokio::test]
async fn concurrent_create_with_one_key_stores_one_order() {
    let store = InMemoryOrderStore::new();
    let key = IdempotencyKey::new("same-key");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            store.create(new_order(1), key).await
        }));
    }

    let mut created = Vec::new();
    let mut conflicts = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(order_id) => created.push(order_id),
            Err(OrderStoreError::Conflict { existing, .. }) => conflicts.push(existing),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created.len(), 1);
    assert!(conflicts.iter().all(|existing| *existing == created[0]));
    assert_eq!(store.order_count().await, 1);
}

#[tokio::test]
async fn retried_attempts_each_leave_a_history_entry() {
    let store = InMemoryOrderStore::new();
    let order_id = store
        .create(new_order(1), IdempotencyKey::new("retry"))
        .await
        .unwrap();

    store
        .advance_state(order_id, SagaPhase::Pending, SagaPhase::Reserving, SagaNote::Started)
        .await
        .unwrap();
    for _ in 0..2 {
        store
            .advance_state(
                order_id,
                SagaPhase::Reserving,
                SagaPhase::Reserving,
                SagaNote::AttemptFailed {
                    action: SagaAction::ReserveInventory,
                    error: "inventory unavailable".to_string(),
                },
            )
            .await
            .unwrap();
    }
    store
        .advance_state(
            order_id,
            SagaPhase::Reserving,
            SagaPhase::Reserved,
            SagaNote::InventoryReserved {
                reservation_id: ReservationId::new("RES-0001"),
            },
        )
        .await
        .unwrap();

    let record = store.require(order_id).await.unwrap();
    assert_eq!(record.saga.attempts(SagaAction::ReserveInventory), 3);

    let revisions: Vec<u64> = record.history.iter().map(|e| e.revision.as_u64()).collect();
    assert_eq!(revisions, vec![1, 2, 3, 4, 5]);

    let failed_attempts = record
        .history
        .iter()
        .filter(|e| {
            matches!(
                e.change,
                Change::Phase {
                    note: SagaNote::AttemptFailed { .. },
                    ..
                }
            )
        })
        .count();
    assert_eq!(failed_attempts, 2);
}

#[tokio::test]
async fn list_and_in_flight() {
    let store = InMemoryOrderStore::new();
    let first = store
        .create(new_order(1), IdempotencyKey::new("a"))
        .await
        .unwrap();
    let second = store
        .create(new_order(2), IdempotencyKey::new("b"))
        .await
        .unwrap();

    store
        .advance_state(first, SagaPhase::Pending, SagaPhase::Cancelled, SagaNote::Started)
        .await
        .unwrap();
    store
        .set_final_status(first, OrderStatus::Cancelled)
        .await
        .unwrap();

    let all = store.list().await.unwrap();
    assert_eq!(all.len(), 2);

    let in_flight = store.list_in_flight().await.unwrap();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].id(), second);
}

#[tokio::test]
async fn require_missing_order() {
    let store = InMemoryOrderStore::new();
    let result = store.require(common::OrderId::new()).await;
    assert!(matches!(result, Err(OrderStoreError::NotFound(_))));
}
