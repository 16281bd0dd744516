//! Concurrent stamping against the in-memory store.
//!
//! Many writers race to stamp the same channel; exactly one must win,
//! through both the lease path and the optimistic path.

use std::sync::Arc;

use chrono::Utc;

use adcrm_core::{Category, Channel, Level, NewNotification, Payload};
use adcrm_store::{MemoryStore, NotificationStore, StoreError};

async fn seeded() -> (Arc<MemoryStore>, i64) {
    let store = Arc::new(MemoryStore::new());
    let n = store
        .create(NewNotification::new(
            1,
            Level::Warning,
            Category::Proxy,
            Payload::new("proxy expired"),
        ))
        .await
        .unwrap();
    (store, n.id)
}

#[tokio::test]
async fn optimistic_stamps_have_single_winner() {
    let (store, id) = seeded().await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.mark_delivered(id, Channel::Socket, Utc::now()).await })
        })
        .collect();

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(e.is_conflict(), "unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(store.get(id).await.unwrap().version, 1);
}

#[tokio::test]
async fn leased_stamps_have_single_winner() {
    let (store, id) = seeded().await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                let lease = store.lease(id, Channel::Chat).await?;
                if lease.notification().is_delivered(Channel::Chat) {
                    lease.release().await?;
                    return Ok::<bool, StoreError>(false);
                }
                lease.mark_delivered(Utc::now()).await?;
                Ok(true)
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn lease_on_missing_notification_is_not_found() {
    let store = MemoryStore::new();
    let err = match store.lease(99, Channel::Email).await {
        Ok(_) => panic!("lease on missing row must fail"),
        Err(e) => e,
    };
    assert!(matches!(err, StoreError::NotFound(99)));
}
