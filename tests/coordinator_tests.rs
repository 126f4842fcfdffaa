//! Integration Tests for the Cache Coordinator
//!
//! Stampede control, fail-open paths, self-healing of corrupt entries and
//! cancellation, all against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use feed_cache::cache::{CacheCoordinator, CoordinatorConfig, KvStore, MemoryStore};
use feed_cache::error::{CacheError, FeedError};

// == Helpers ==

fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        lock_lease: Duration::from_secs(10),
        max_wait: Duration::from_secs(2),
        backoff_min: Duration::from_millis(10),
        backoff_max: Duration::from_millis(30),
    }
}

fn setup(config: CoordinatorConfig) -> (CacheCoordinator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(1_000));
    let kv: Arc<dyn KvStore> = store.clone();
    (CacheCoordinator::new(kv, config), store)
}

/// Holds the lock for `key` on behalf of some other worker.
async fn hold_lock(store: &MemoryStore, key: &str) {
    let acquired = store
        .set_if_absent(&format!("{key}:lock"), b"someone-else", Duration::from_secs(10))
        .await
        .unwrap();
    assert!(acquired);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    score: f64,
    tags: Vec<String>,
}

/// Store whose every operation fails.
struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set_if_absent(&self, _: &str, _: &[u8], _: Duration) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set_with_expiry(&self, _: &str, _: &[u8], _: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

// == Value Equivalence ==

#[tokio::test]
async fn test_hit_and_miss_return_the_computed_value() {
    let (coordinator, _) = setup(fast_config());
    let profile = Profile {
        name: "ada".to_string(),
        score: 0.125,
        tags: vec!["x".to_string(), "y".to_string()],
    };

    let expected = profile.clone();
    let miss: Profile = assert_ok!(
        coordinator
            .get_or_compute("profile:1", 60, || async move { Ok::<_, FeedError>(expected) })
            .await
    );
    let hit: Profile = assert_ok!(
        coordinator
            .get_or_compute("profile:1", 60, || async {
                Err::<Profile, _>(FeedError::Source("must not run".to_string()))
            })
            .await
    );

    assert_eq!(miss, profile);
    assert_eq!(hit, profile);

    let stats = coordinator.stats().snapshot();
    assert_eq!((stats.misses, stats.hits), (1, 1));
}

#[tokio::test]
async fn test_stored_ttl_is_jittered_base() {
    let (coordinator, store) = setup(fast_config());

    let _: u32 = assert_ok!(
        coordinator
            .get_or_compute("ttl", 300, || async { Ok::<_, FeedError>(1) })
            .await
    );

    let remaining = store.ttl_remaining_ms("ttl").await.unwrap();
    assert!(remaining <= 360_000, "ttl {remaining}ms above jitter bound");
    assert!(remaining > 235_000, "ttl {remaining}ms below jitter bound");
}

// == Stampede Control ==

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_compute_once() {
    let (coordinator, _) = setup(fast_config());
    let calls = Arc::new(AtomicUsize::new(0));
    let mut tasks = JoinSet::new();

    for _ in 0..32 {
        let coordinator = coordinator.clone();
        let calls = Arc::clone(&calls);
        tasks.spawn(async move {
            coordinator
                .get_or_compute("hot-key", 60, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    Ok::<_, FeedError>(vec![1u32, 2, 3])
                })
                .await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let value = assert_ok!(joined.unwrap());
        assert_eq!(value, vec![1, 2, 3]);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = coordinator.stats().snapshot();
    assert_eq!(stats.locks_acquired, 1);
    // Latecomers may find the value already stored
    assert_eq!(stats.served_after_wait + stats.hits, 31);
}

#[tokio::test]
async fn test_waiter_receives_winners_value() {
    let (coordinator, store) = setup(fast_config());
    hold_lock(&store, "k").await;

    let writer = Arc::clone(&store);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        writer
            .set_with_expiry("k", b"\"from-winner\"", Duration::from_secs(60))
            .await
            .unwrap();
    });

    let calls = AtomicUsize::new(0);
    let value: String = assert_ok!(
        coordinator
            .get_or_compute("k", 60, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FeedError>("from-waiter".to_string())
            })
            .await
    );

    assert_eq!(value, "from-winner");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(coordinator.stats().snapshot().served_after_wait, 1);
}

#[tokio::test]
async fn test_stalled_lock_falls_back_after_max_wait() {
    let config = CoordinatorConfig {
        max_wait: Duration::from_millis(200),
        ..fast_config()
    };
    let (coordinator, store) = setup(config);
    hold_lock(&store, "stalled").await;

    let started = Instant::now();
    let value: u64 = assert_ok!(
        coordinator
            .get_or_compute("stalled", 60, || async { Ok::<_, FeedError>(42) })
            .await
    );

    assert_eq!(value, 42);
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(coordinator.stats().snapshot().wait_timeouts, 1);
}

#[tokio::test]
async fn test_waiter_takes_over_when_holder_fails() {
    let (coordinator, store) = setup(fast_config());
    hold_lock(&store, "orphan").await;

    // The holder gives up without writing a value
    let holder = Arc::clone(&store);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        holder.delete("orphan:lock").await.unwrap();
    });

    let started = Instant::now();
    let value: u32 = assert_ok!(
        coordinator
            .get_or_compute("orphan", 60, || async { Ok::<_, FeedError>(11) })
            .await
    );

    assert_eq!(value, 11);
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "waiter sat out the whole wait window"
    );
    let stats = coordinator.stats().snapshot();
    assert_eq!(stats.wait_timeouts, 0);
    assert_eq!(stats.locks_acquired, 1);
    assert_eq!(store.get("orphan").await.unwrap(), Some(b"11".to_vec()));
    assert_eq!(store.get("orphan:lock").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_holder_hands_over_to_one_waiter() {
    let (coordinator, _) = setup(fast_config());
    let calls = Arc::new(AtomicUsize::new(0));
    let mut tasks = JoinSet::new();

    for _ in 0..8 {
        let coordinator = coordinator.clone();
        let calls = Arc::clone(&calls);
        tasks.spawn(async move {
            coordinator
                .get_or_compute("flaky", 60, || async move {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    if call == 0 {
                        Err(FeedError::Source("first attempt fails".to_string()))
                    } else {
                        Ok(call as u32)
                    }
                })
                .await
        });
    }

    let started = Instant::now();
    let mut failures = 0;
    while let Some(joined) = tasks.join_next().await {
        if joined.unwrap().is_err() {
            failures += 1;
        }
    }

    // One failed compute, then a single waiter recomputes for everyone else
    assert_eq!(failures, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(coordinator.stats().snapshot().wait_timeouts, 0);
}

// == Failure Handling ==

#[tokio::test]
async fn test_corrupt_entry_is_deleted_and_recomputed() {
    let (coordinator, store) = setup(fast_config());
    store
        .set_with_expiry("corrupt", b"{not json", Duration::from_secs(60))
        .await
        .unwrap();

    let value: Vec<u8> = assert_ok!(
        coordinator
            .get_or_compute("corrupt", 60, || async { Ok::<_, FeedError>(vec![9, 9]) })
            .await
    );

    assert_eq!(value, vec![9, 9]);
    assert_eq!(coordinator.stats().snapshot().corrupt_entries, 1);
    assert_eq!(store.get("corrupt").await.unwrap(), Some(b"[9,9]".to_vec()));
}

#[tokio::test]
async fn test_failing_store_fails_open() {
    let store: Arc<dyn KvStore> = Arc::new(FailingStore);
    let coordinator = CacheCoordinator::new(store, fast_config());
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let value: String = assert_ok!(
            coordinator
                .get_or_compute("any", 60, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, FeedError>("direct".to_string())
                })
                .await
        );
        assert_eq!(value, "direct");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(coordinator.stats().snapshot().fail_opens, 3);
}

#[tokio::test]
async fn test_compute_error_propagates_and_releases_lock() {
    let (coordinator, store) = setup(fast_config());

    let result: Result<u32, FeedError> = coordinator
        .get_or_compute("broken", 60, || async {
            Err(FeedError::Source("db down".to_string()))
        })
        .await;

    let err = assert_err!(result);
    assert!(matches!(err, FeedError::Source(msg) if msg == "db down"));
    assert_eq!(store.get("broken").await.unwrap(), None);
    assert_eq!(store.get("broken:lock").await.unwrap(), None);
    assert_eq!(coordinator.stats().snapshot().compute_errors, 1);

    // Nothing was cached, so the next caller computes again
    let value: u32 = assert_ok!(
        coordinator
            .get_or_compute("broken", 60, || async { Ok::<_, FeedError>(5) })
            .await
    );
    assert_eq!(value, 5);
}

#[tokio::test]
async fn test_degenerate_inputs_bypass_the_store() {
    let (coordinator, store) = setup(fast_config());

    let empty_key: u8 = assert_ok!(
        coordinator
            .get_or_compute("", 60, || async { Ok::<_, FeedError>(1) })
            .await
    );
    let zero_ttl: u8 = assert_ok!(
        coordinator
            .get_or_compute("zero", 0, || async { Ok::<_, FeedError>(2) })
            .await
    );

    assert_eq!((empty_key, zero_ttl), (1, 2));
    assert!(store.is_empty().await);
    assert_eq!(coordinator.stats().snapshot().locks_acquired, 0);
}

// == Cancellation ==

#[tokio::test]
async fn test_cancel_while_waiting() {
    let (coordinator, store) = setup(fast_config());
    hold_lock(&store, "waiting").await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let calls = AtomicUsize::new(0);
    let started = Instant::now();
    let result: Result<u32, FeedError> = coordinator
        .get_or_compute_cancellable("waiting", 60, &cancel, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
        .await;

    assert!(matches!(result, Err(FeedError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(coordinator.stats().snapshot().cancellations, 1);
}

#[tokio::test]
async fn test_cancel_while_computing_releases_lock() {
    let (coordinator, store) = setup(fast_config());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result: Result<u32, FeedError> = coordinator
        .get_or_compute_cancellable("slow", 60, &cancel, || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(1)
        })
        .await;

    assert!(matches!(result, Err(FeedError::Cancelled)));
    assert_eq!(store.get("slow").await.unwrap(), None);
    assert_eq!(store.get("slow:lock").await.unwrap(), None);
}

#[tokio::test]
async fn test_dropped_request_releases_lock() {
    let (coordinator, store) = setup(fast_config());

    let task = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .get_or_compute("abandoned", 60, || async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok::<_, FeedError>(1u32)
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.get("abandoned:lock").await.unwrap().is_some());

    task.abort();
    let _ = task.await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.get("abandoned:lock").await.unwrap(), None);
}
