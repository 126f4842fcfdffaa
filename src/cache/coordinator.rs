//! Cache Coordinator
//!
//! Cache-aside get-or-compute with stampede protection. On a miss, workers
//! race for a short self-expiring lock in the store; the winner computes and
//! writes back, the others poll for the value and fall back to computing
//! directly once their wait window runs out.
//!
//! Every store fault degrades to a direct computation. Only errors produced
//! by the compute function itself reach the caller.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{CoordinatorStats, KvStore, TtlJitter, LOCK_SUFFIX};
use crate::error::{CacheError, Cancelled};

// == Coordinator Config ==
/// Timings for lock leases and waiter polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How long a compute lock lives if never released. Sized well above
    /// expected compute latency; a second compute may start once it lapses.
    pub lock_lease: Duration,
    /// How long a waiter polls before computing on its own
    pub max_wait: Duration,
    /// Lower bound of the randomized delay between polls
    pub backoff_min: Duration,
    /// Upper bound of the randomized delay between polls
    pub backoff_max: Duration,
}

impl CoordinatorConfig {
    fn backoff_delay(&self) -> Duration {
        let lo = u64::try_from(self.backoff_min.as_millis()).unwrap_or(u64::MAX);
        let hi = u64::try_from(self.backoff_max.as_millis())
            .unwrap_or(u64::MAX)
            .max(lo);
        Duration::from_millis(fastrand::u64(lo..=hi))
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_lease: Duration::from_secs(10),
            max_wait: Duration::from_secs(2),
            backoff_min: Duration::from_millis(50),
            backoff_max: Duration::from_millis(150),
        }
    }
}

// == Lock Token ==
/// Identity of one compute lock: the lock key and the marker of its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    key: String,
    owner: String,
}

impl LockToken {
    /// Fresh token for `cache_key` with a random owner marker.
    pub fn for_key(cache_key: &str) -> Self {
        Self {
            key: format!("{cache_key}{LOCK_SUFFIX}"),
            owner: Uuid::new_v4().to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// Releases a held lock exactly once: explicitly via `release`, or from `Drop`
/// when the owning future is cancelled or unwinds.
struct LockGuard {
    store: Arc<dyn KvStore>,
    token: Option<LockToken>,
}

impl LockGuard {
    fn new(store: Arc<dyn KvStore>, token: LockToken) -> Self {
        Self {
            store,
            token: Some(token),
        }
    }

    async fn release(mut self) {
        if let Some(token) = self.token.take() {
            release_lock(self.store.as_ref(), &token).await;
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                handle.spawn(async move {
                    release_lock(store.as_ref(), &token).await;
                });
            }
            Err(_) => {
                warn!(lock_key = %token.key, "No runtime to release abandoned lock, leaving it to expire");
            }
        }
    }
}

async fn release_lock(store: &dyn KvStore, token: &LockToken) {
    match store
        .delete_if_equals(&token.key, token.owner.as_bytes())
        .await
    {
        Ok(true) => debug!(lock_key = %token.key, "Lock released"),
        Ok(false) => warn!(
            lock_key = %token.key,
            "Lock lapsed before release; compute outlived its lease"
        ),
        Err(err) => warn!(
            lock_key = %token.key,
            error = %err,
            "Lock release failed, leaving it to expire"
        ),
    }
}

// == Cancellation ==
/// Something a coordinated call can be interrupted by. `Reason` is what an
/// interruption reports; it is uninhabited when the call cannot be cancelled.
trait CancelSignal {
    type Reason;

    fn wait(&self) -> WaitForCancellationFuture<'_>;

    fn reason(&self) -> Self::Reason;
}

impl CancelSignal for CancellationToken {
    type Reason = Cancelled;

    fn wait(&self) -> WaitForCancellationFuture<'_> {
        self.cancelled()
    }

    fn reason(&self) -> Cancelled {
        Cancelled
    }
}

/// Signal of a call that has no cancellation token. It has no values, so
/// `Option<&Uncancellable>` is always `None`.
enum Uncancellable {}

impl CancelSignal for Uncancellable {
    type Reason = Infallible;

    fn wait(&self) -> WaitForCancellationFuture<'_> {
        match *self {}
    }

    fn reason(&self) -> Infallible {
        match *self {}
    }
}

enum Lookup<T> {
    Hit(T),
    Acquired(LockGuard),
    Contended,
}

enum WaitOutcome<T, R> {
    Ready(T),
    /// The lock went away without a value and this waiter now holds it
    Acquired(LockGuard),
    TimedOut,
    Cancelled(R),
}

enum Interrupt<E, R> {
    Compute(E),
    Cancelled(R),
}

// == Cache Coordinator ==
/// Get-or-compute front for a shared [`KvStore`].
///
/// The store handle is injected; the coordinator keeps no per-key state of
/// its own, so any number of processes can share one store.
#[derive(Clone)]
pub struct CacheCoordinator {
    store: Arc<dyn KvStore>,
    config: CoordinatorConfig,
    jitter: TtlJitter,
    stats: Arc<CoordinatorStats>,
}

impl CacheCoordinator {
    // == Constructor ==
    pub fn new(store: Arc<dyn KvStore>, config: CoordinatorConfig) -> Self {
        Self {
            store,
            config,
            jitter: TtlJitter::default(),
            stats: Arc::new(CoordinatorStats::new()),
        }
    }

    /// Replaces the TTL jitter policy.
    pub fn with_jitter(mut self, jitter: TtlJitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<CoordinatorStats> {
        Arc::clone(&self.stats)
    }

    // == Get Or Compute ==
    /// Returns the cached value under `key`, computing and caching it on a miss.
    ///
    /// `base_ttl_secs` is jittered before the write. An empty key or a zero
    /// TTL skips the cache entirely. Dropping the returned future stops any
    /// polling; a lock it holds is released in the background.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        base_ttl_secs: u64,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cancel: Option<&Uncancellable> = None;
        match self.coordinate(key, base_ttl_secs, cancel, compute).await {
            Ok(value) => Ok(value),
            Err(Interrupt::Compute(err)) => Err(err),
            Err(Interrupt::Cancelled(never)) => match never {},
        }
    }

    /// Like [`get_or_compute`](Self::get_or_compute), but gives up as soon as
    /// `cancel` fires: a waiter stops polling, and an in-flight compute is
    /// dropped and its lock released.
    pub async fn get_or_compute_cancellable<T, E, F, Fut>(
        &self,
        key: &str,
        base_ttl_secs: u64,
        cancel: &CancellationToken,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<Cancelled>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.coordinate(key, base_ttl_secs, Some(cancel), compute)
            .await
            .map_err(|interrupt| match interrupt {
                Interrupt::Compute(err) => err,
                Interrupt::Cancelled(cancelled) => E::from(cancelled),
            })
    }

    async fn coordinate<T, E, F, Fut, C>(
        &self,
        key: &str,
        base_ttl_secs: u64,
        cancel: Option<&C>,
        compute: F,
    ) -> Result<T, Interrupt<E, C::Reason>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: CancelSignal,
    {
        let started = Instant::now();

        if key.is_empty() {
            warn!("Empty cache key, bypassing cache");
            return self.run_compute(cancel, compute).await;
        }
        if base_ttl_secs == 0 {
            warn!(key, "Zero TTL, bypassing cache");
            return self.run_compute(cancel, compute).await;
        }

        let result = match self.lookup::<T>(key).await {
            Ok(Lookup::Hit(value)) => Ok(value),
            Ok(Lookup::Acquired(guard)) => {
                self.compute_and_store(key, base_ttl_secs, guard, cancel, compute)
                    .await
            }
            Ok(Lookup::Contended) => {
                debug!(key, "Lock held by another worker, waiting");
                match self.wait_for_value::<T, C>(key, cancel).await {
                    Ok(WaitOutcome::Ready(value)) => {
                        self.stats.record_served_after_wait();
                        debug!(key, "Received value after wait");
                        Ok(value)
                    }
                    Ok(WaitOutcome::Acquired(guard)) => {
                        self.compute_and_store(key, base_ttl_secs, guard, cancel, compute)
                            .await
                    }
                    Ok(WaitOutcome::Cancelled(reason)) => {
                        self.stats.record_cancellation();
                        info!(key, "Cancelled while waiting for value");
                        Err(Interrupt::Cancelled(reason))
                    }
                    Ok(WaitOutcome::TimedOut) => {
                        self.stats.record_wait_timeout();
                        warn!(key, "Value not found after wait, computing directly");
                        self.run_compute(cancel, compute).await
                    }
                    Err(err) => self.fail_open(key, err, cancel, compute).await,
                }
            }
            Err(err) => self.fail_open(key, err, cancel, compute).await,
        };

        debug!(
            key,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cache operation completed"
        );
        result
    }

    /// Hit, lock won, or lock held elsewhere.
    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Lookup<T>, CacheError> {
        if let Some(value) = self.read_value::<T>(key).await? {
            self.stats.record_hit();
            debug!(key, "Cache hit");
            return Ok(Lookup::Hit(value));
        }

        self.stats.record_miss();
        debug!(key, "Cache miss");

        match self.try_lock(key).await? {
            Some(guard) => Ok(Lookup::Acquired(guard)),
            None => Ok(Lookup::Contended),
        }
    }

    /// One attempt at the compute lock for `key`.
    async fn try_lock(&self, key: &str) -> Result<Option<LockGuard>, CacheError> {
        let token = LockToken::for_key(key);
        let acquired = self
            .store
            .set_if_absent(token.key(), token.owner().as_bytes(), self.config.lock_lease)
            .await?;

        Ok(acquired.then(|| LockGuard::new(Arc::clone(&self.store), token)))
    }

    /// Reads and decodes `key`; a payload that does not decode is deleted.
    async fn read_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(bytes) = self.store.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                self.stats.record_corrupt_entry();
                warn!(key, error = %err, "Corrupt cache entry, deleting");
                self.store.delete(key).await?;
                Ok(None)
            }
        }
    }

    async fn compute_and_store<T, E, F, Fut, C>(
        &self,
        key: &str,
        base_ttl_secs: u64,
        guard: LockGuard,
        cancel: Option<&C>,
        compute: F,
    ) -> Result<T, Interrupt<E, C::Reason>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: CancelSignal,
    {
        self.stats.record_lock_acquired();
        debug!(key, "Lock acquired, computing value");

        let outcome = self.run_compute(cancel, compute).await;
        match &outcome {
            Ok(value) => self.store_value(key, base_ttl_secs, value).await,
            Err(Interrupt::Compute(_)) => error!(key, "Compute failed, nothing cached"),
            Err(Interrupt::Cancelled(_)) => info!(key, "Compute cancelled, nothing cached"),
        }

        guard.release().await;
        outcome
    }

    async fn store_value<T: Serialize>(&self, key: &str, base_ttl_secs: u64, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key, error = %err, "Computed value does not serialize, not caching");
                return;
            }
        };

        let ttl = self.jitter.jitter(base_ttl_secs);
        match self
            .store
            .set_with_expiry(key, &bytes, Duration::from_secs(ttl))
            .await
        {
            Ok(()) => debug!(key, ttl, "Stored computed value"),
            Err(err) => {
                self.stats.record_fail_open();
                warn!(key, error = %err, "Failed to store computed value");
            }
        }
    }

    /// Polls `key` with randomized backoff until it appears, the window
    /// closes, or `cancel` fires. When the lock disappears without a value
    /// being written, the waiter takes the lock over and computes.
    async fn wait_for_value<T, C>(
        &self,
        key: &str,
        cancel: Option<&C>,
    ) -> Result<WaitOutcome<T, C::Reason>, CacheError>
    where
        T: DeserializeOwned,
        C: CancelSignal,
    {
        let deadline = Instant::now() + self.config.max_wait;

        loop {
            if let Some(value) = self.read_value::<T>(key).await? {
                return Ok(WaitOutcome::Ready(value));
            }

            if let Some(guard) = self.try_lock(key).await? {
                // The holder writes before releasing, so re-read once
                if let Some(value) = self.read_value::<T>(key).await? {
                    guard.release().await;
                    return Ok(WaitOutcome::Ready(value));
                }
                info!(key, "Lock freed without a value, taking over the compute");
                return Ok(WaitOutcome::Acquired(guard));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }

            let delay = self.config.backoff_delay().min(deadline - now);
            match cancel {
                Some(signal) => {
                    tokio::select! {
                        _ = signal.wait() => return Ok(WaitOutcome::Cancelled(signal.reason())),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    async fn fail_open<T, E, F, Fut, C>(
        &self,
        key: &str,
        err: CacheError,
        cancel: Option<&C>,
        compute: F,
    ) -> Result<T, Interrupt<E, C::Reason>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: CancelSignal,
    {
        self.stats.record_fail_open();
        error!(key, error = %err, "Cache store error, computing directly");
        self.run_compute(cancel, compute).await
    }

    async fn run_compute<T, E, F, Fut, C>(
        &self,
        cancel: Option<&C>,
        compute: F,
    ) -> Result<T, Interrupt<E, C::Reason>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: CancelSignal,
    {
        let fut = compute();
        let result = match cancel {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.wait() => {
                        self.stats.record_cancellation();
                        return Err(Interrupt::Cancelled(signal.reason()));
                    }
                    result = fut => result,
                }
            }
            None => fut.await,
        };

        result.map_err(|err| {
            self.stats.record_compute_error();
            Interrupt::Compute(err)
        })
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    #[test]
    fn test_lock_token_key_and_owner() {
        let a = LockToken::for_key("feed:1");
        let b = LockToken::for_key("feed:1");

        assert_eq!(a.key(), "feed:1:lock");
        assert_eq!(a.key(), b.key());
        assert_ne!(a.owner(), b.owner());
    }

    #[test]
    fn test_backoff_delay_within_range() {
        let config = CoordinatorConfig::default();
        for _ in 0..100 {
            let delay = config.backoff_delay();
            assert!(delay >= config.backoff_min);
            assert!(delay <= config.backoff_max);
        }
    }

    #[test]
    fn test_backoff_delay_with_inverted_range() {
        let config = CoordinatorConfig {
            backoff_min: Duration::from_millis(30),
            backoff_max: Duration::from_millis(10),
            ..CoordinatorConfig::default()
        };
        assert_eq!(config.backoff_delay(), Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_guard_release_deletes_only_own_lock() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new(10));
        let token = LockToken::for_key("k");
        store
            .set_if_absent(token.key(), token.owner().as_bytes(), Duration::from_secs(5))
            .await
            .unwrap();

        LockGuard::new(Arc::clone(&store), token.clone()).release().await;
        assert!(store.get("k:lock").await.unwrap().is_none());

        // A successor's lock survives a stale owner's release
        let successor = LockToken::for_key("k");
        store
            .set_if_absent(successor.key(), successor.owner().as_bytes(), Duration::from_secs(5))
            .await
            .unwrap();
        LockGuard::new(Arc::clone(&store), token).release().await;
        assert!(store.get("k:lock").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_in_background() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new(10));
        let token = LockToken::for_key("k");
        store
            .set_if_absent(token.key(), token.owner().as_bytes(), Duration::from_secs(5))
            .await
            .unwrap();

        drop(LockGuard::new(Arc::clone(&store), token));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(store.get("k:lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hit_skips_compute() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new(10));
        store
            .set_with_expiry("k", b"41", Duration::from_secs(60))
            .await
            .unwrap();
        let coordinator = CacheCoordinator::new(store, CoordinatorConfig::default());

        let value: Result<u32, String> = coordinator
            .get_or_compute("k", 60, || async { Ok(7) })
            .await;

        assert_eq!(value, Ok(41));
        assert_eq!(coordinator.stats().snapshot().hits, 1);
    }
}
