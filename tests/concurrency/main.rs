//! Integration tests for concurrent id allocation, optimistic concurrency
//! and sessions running side by side.

use std::collections::BTreeSet;
use std::sync::Arc;

use docweave::{
    Backend, Document, Filter, IsolationLevel, MemoryBackend, SequentialIdGenerator, Statement, Store, StoreConfig,
    StoreError, Transaction,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Document)]
struct Counter {
    id: i64,
    value: u32,
}

async fn store_on(backend: &MemoryBackend, config: StoreConfig) -> Store {
    Store::builder()
        .config(config)
        .backend(backend.clone())
        .build()
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_never_share_an_id() {
    let backend = MemoryBackend::new();
    // Two stores on one database behave like two processes.
    let stores = [
        store_on(&backend, StoreConfig::default()).await,
        store_on(&backend, StoreConfig::default()).await,
    ];

    let mut handles = Vec::new();
    for store in stores {
        handles.push(tokio::spawn(async move {
            let session = store.create_session();
            let mut ids = Vec::with_capacity(1000);
            for _ in 0..1000 {
                ids.push(session.store().next_id("").await.unwrap());
            }
            ids
        }));
    }

    let mut all = BTreeSet::new();
    for handle in handles {
        let ids = handle.await.unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids must increase per caller");
        all.extend(ids);
    }
    assert_eq!(all.len(), 2000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ungated_callers_of_one_store_get_distinct_ids() {
    let backend = MemoryBackend::new();
    let store = store_on(
        &backend,
        StoreConfig::default().with_query_gating(false).with_id_block_size(7),
    )
    .await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..50 {
                ids.push(store.next_id("").await.unwrap());
            }
            ids
        }));
    }
    let mut all = BTreeSet::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    assert_eq!(all.len(), 400);
}

#[tokio::test]
async fn sequential_generator_continues_after_existing_documents() {
    let backend = MemoryBackend::new();
    let first = store_on(&backend, StoreConfig::default()).await;
    let mut session = first.create_session();
    for value in 0..3 {
        session.save(&mut Counter { id: 0, value }).await.unwrap();
    }
    session.dispose().await.unwrap();

    let shared: Arc<dyn Backend> = Arc::new(backend.clone());
    let second = Store::builder()
        .shared_backend(shared.clone())
        .id_generator(SequentialIdGenerator::new(shared, &StoreConfig::default()))
        .build()
        .await
        .unwrap();
    assert_eq!(second.next_id("").await.unwrap(), 4);
}

#[tokio::test]
async fn checked_save_detects_a_concurrent_update() {
    let backend = MemoryBackend::new();
    let store = store_on(&backend, StoreConfig::default()).await;
    let mut session = store.create_session();
    let mut counter = Counter { id: 0, value: 1 };
    session.save(&mut counter).await.unwrap();
    session.dispose().await.unwrap();

    let mut slow = store.create_session();
    let mut stale: Counter = slow.get(counter.id).await.unwrap().unwrap();

    let mut fast = store.create_session();
    let mut fresh: Counter = fast.get(counter.id).await.unwrap().unwrap();
    fresh.value = 2;
    fast.save(&mut fresh).await.unwrap();
    fast.dispose().await.unwrap();

    stale.value = 3;
    slow.save_checked(&mut stale).await.unwrap();
    let err = slow.flush().await.unwrap_err();
    assert_eq!(
        err,
        StoreError::Concurrency {
            collection: String::new(),
            id: counter.id,
            expected: 0,
            actual: 1,
        }
    );
    slow.dispose().await.unwrap();

    let mut check = store.create_session();
    let stored: Counter = check.get(counter.id).await.unwrap().unwrap();
    assert_eq!(stored.value, 2);
}

#[tokio::test]
async fn concurrency_error_discards_the_whole_unit_of_work() {
    let backend = MemoryBackend::new();
    let store = store_on(&backend, StoreConfig::default()).await;
    let mut session = store.create_session();
    let mut counter = Counter { id: 0, value: 1 };
    session.save(&mut counter).await.unwrap();
    session.dispose().await.unwrap();

    let mut slow = store.create_session();
    let mut stale: Counter = slow.get(counter.id).await.unwrap().unwrap();

    let mut fast = store.create_session();
    let mut fresh: Counter = fast.get(counter.id).await.unwrap().unwrap();
    fresh.value = 2;
    fast.save(&mut fresh).await.unwrap();
    fast.dispose().await.unwrap();

    let mut bystander = Counter { id: 0, value: 7 };
    slow.save(&mut bystander).await.unwrap();
    slow.flush().await.unwrap();
    let mut pending = Counter { id: 0, value: 8 };
    slow.save(&mut pending).await.unwrap();
    stale.value = 3;
    slow.save_checked(&mut stale).await.unwrap();
    assert!(matches!(slow.dispose().await, Err(StoreError::Concurrency { .. })));

    let mut check = store.create_session();
    assert!(check.get::<Counter>(bystander.id).await.unwrap().is_none());
    assert!(check.get::<Counter>(pending.id).await.unwrap().is_none());
    let stored: Counter = check.get(counter.id).await.unwrap().unwrap();
    assert_eq!(stored.value, 2);
}

#[tokio::test]
async fn unchecked_save_overwrites() {
    let backend = MemoryBackend::new();
    let store = store_on(&backend, StoreConfig::default()).await;
    let mut session = store.create_session();
    let mut counter = Counter { id: 0, value: 1 };
    session.save(&mut counter).await.unwrap();
    session.dispose().await.unwrap();

    let mut slow = store.create_session();
    let mut stale: Counter = slow.get(counter.id).await.unwrap().unwrap();

    let mut fast = store.create_session();
    let mut fresh: Counter = fast.get(counter.id).await.unwrap().unwrap();
    fresh.value = 2;
    fast.save(&mut fresh).await.unwrap();
    fast.dispose().await.unwrap();

    stale.value = 3;
    slow.save(&mut stale).await.unwrap();
    slow.dispose().await.unwrap();

    let mut tx = backend.begin(IsolationLevel::default()).await.unwrap();
    let rows = tx
        .query(&Statement::select("Document", Filter::eq("Id", counter.id)))
        .await
        .unwrap();
    assert_eq!(rows[0]["Version"], 2);
}

#[tokio::test]
async fn overlapping_checked_writers_conflict_at_commit() {
    let backend = MemoryBackend::new();
    let store = store_on(&backend, StoreConfig::default()).await;
    let mut session = store.create_session();
    let mut counter = Counter { id: 0, value: 1 };
    session.save(&mut counter).await.unwrap();
    session.dispose().await.unwrap();

    let mut first = store.create_session();
    let mut second = store.create_session();
    let mut a: Counter = first.get(counter.id).await.unwrap().unwrap();
    let mut b: Counter = second.get(counter.id).await.unwrap().unwrap();
    a.value = 10;
    b.value = 20;
    first.save_checked(&mut a).await.unwrap();
    second.save_checked(&mut b).await.unwrap();
    first.flush().await.unwrap();
    second.flush().await.unwrap();

    first.dispose().await.unwrap();
    let err = second.dispose().await.unwrap_err();
    assert!(matches!(err, StoreError::Backend(_)));
    assert!(second.is_disposed());
}
