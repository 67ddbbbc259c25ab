use common::{IdempotencyKey, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Money, NewOrder, OrderItem, SagaAction, SagaNote, SagaPhase};
use order_store::{InMemoryOrderStore, OrderStore};

fn new_order() -> NewOrder {
    NewOrder::new(
        UserId::new(1),
        vec![OrderItem::new(1, 2, Money::from_cents(1000))],
        "1 Main St",
    )
    .unwrap()
}

fn bench_create(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryOrderStore::new();
    let mut n = 0u64;

    c.bench_function("order_store/create", |b| {
        b.iter(|| {
            n += 1;
            let key = IdempotencyKey::new(format!("bench-{n}"));
            rt.block_on(async { store.create(new_order(), key).await.unwrap() });
        });
    });
}

fn bench_record_attempt(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryOrderStore::new();
    let order_id = rt.block_on(async {
        let order_id = store
            .create(new_order(), IdempotencyKey::new("bench"))
            .await
            .unwrap();
        store
            .advance_state(order_id, SagaPhase::Pending, SagaPhase::Reserving, SagaNote::Started)
            .await
            .unwrap();
        order_id
    });

    c.bench_function("order_store/record_attempt", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .advance_state(
                        order_id,
                        SagaPhase::Reserving,
                        SagaPhase::Reserving,
                        SagaNote::AttemptFailed {
                            action: SagaAction::ReserveInventory,
                            error: "bench".to_string(),
                        },
                    )
                    .await
                    .unwrap()
            });
        });
    });
}

fn bench_list(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryOrderStore::new();
    rt.block_on(async {
        for i in 0..100 {
            store
                .create(new_order(), IdempotencyKey::new(format!("key-{i}")))
                .await
                .unwrap();
        }
    });

    c.bench_function("order_store/list_100", |b| {
        b.iter(|| rt.block_on(async { store.list().await.unwrap() }));
    });
}

criterion_group!(benches, bench_create, bench_record_attempt, bench_list);
criterion_main!(benches);
