//! Cache-aside reads over the coordination store.
//!
//! Three strategies share the same read-then-fallback shape:
//!
//! | Strategy | On miss | Protects against |
//! |----------|---------|------------------|
//! | [`PassThrough`](CacheStrategy::PassThrough) | load, fill, tombstone if absent | penetration |
//! | [`Mutex`](CacheStrategy::Mutex) | one rebuilder under a lock, others poll | stampede |
//! | [`LogicalExpire`](CacheStrategy::LogicalExpire) | never misses once warmed; stale value served while one background task rebuilds | stampede without blocking |
//!
//! A cache key holds a JSON entity, an empty-string tombstone, or nothing.
//! Logical-expiration keys hold `{"data": T, "expireAt": RFC3339}` with no
//! physical TTL.
//!
//! Writes never update the cache in place: callers update the backing store
//! first and then [`invalidate`](CacheClient::invalidate) the key.

use crate::config::CacheConfig;
use crate::lock::DistributedLock;
use crate::metrics::CacheMetrics;
use chrono::{DateTime, Utc};
use flashsale_core::coordination::CoordinationStore;
use flashsale_core::environment::Clock;
use flashsale_core::keys::rebuild_lock_resource;
use flashsale_core::{FlashSaleError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

/// Read policy selected at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStrategy {
    /// Tombstone missing entities, no stampede protection.
    PassThrough,
    /// Single rebuilder per cold key, bounded polling for the rest.
    Mutex,
    /// Serve stale values while one background task refreshes.
    LogicalExpire,
}

impl CacheStrategy {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PassThrough => "pass_through",
            Self::Mutex => "mutex",
            Self::LogicalExpire => "logical_expire",
        }
    }
}

/// Value wrapper used by the logical-expiration strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringEntry<T> {
    /// Cached entity
    pub data: T,
    /// Instant after which the entity is stale
    pub expire_at: DateTime<Utc>,
}

impl<T> ExpiringEntry<T> {
    /// Whether the entry is past its logical expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }
}

/// Bounded pool running logical-expiration rebuilds off the request path.
///
/// Tasks beyond the permit count wait for a permit instead of running
/// concurrently, so a burst of expiring hot keys cannot flood the backing store.
#[derive(Debug, Clone)]
pub struct RebuildExecutor {
    permits: Arc<Semaphore>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl RebuildExecutor {
    /// Pool allowing `workers` concurrent rebuilds.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            in_flight: Arc::new(in_flight),
        }
    }

    /// Schedule `task`; it starts once a permit is free.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.send_modify(|n| *n += 1);
        CacheMetrics::record_in_flight(*in_flight.borrow());

        tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => task.await,
                Err(e) => tracing::error!(error = %e, "Rebuild pool closed, dropping rebuild"),
            }
            in_flight.send_modify(|n| *n = n.saturating_sub(1));
            CacheMetrics::record_in_flight(*in_flight.borrow());
        })
    }

    /// Rebuilds scheduled or running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait until no rebuild is scheduled or running.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives as long as `self`, so this only ends when idle.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

enum Cached<T> {
    Hit(T),
    Tombstone,
    Miss,
}

/// How the lock holder of a mutex rebuild obtained its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockedRead {
    /// The backing store was queried and the cache filled.
    Loaded,
    /// The re-read after locking found a value or tombstone already cached.
    FilledElsewhere,
}

fn locked_read_label<T>(result: &Result<(T, LockedRead)>) -> &'static str {
    match result {
        Ok((_, LockedRead::Loaded)) => "rebuilt",
        Ok((_, LockedRead::FilledElsewhere)) => "hit_after_lock",
        Err(_) => "rebuild_error",
    }
}

/// Cache-aside client.
///
/// # Example
///
/// ```no_run
/// use flashsale_runtime::cache::CacheClient;
/// use flashsale_runtime::config::CacheConfig;
/// use flashsale_core::coordination::CoordinationStore;
/// use flashsale_core::environment::SystemClock;
/// use flashsale_core::keys::CACHE_SHOP_KEY;
/// use std::sync::Arc;
///
/// # async fn example<S: CoordinationStore>(store: Arc<S>) -> flashsale_core::Result<()> {
/// let cache = CacheClient::new(store, Arc::new(SystemClock), CacheConfig::default());
///
/// let name: Option<String> = cache
///     .query_with_mutex(CACHE_SHOP_KEY, 1_i64, |id| async move {
///         Ok(Some(format!("shop-{id}")))
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct CacheClient<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    rebuilds: RebuildExecutor,
}

impl<S: CoordinationStore> CacheClient<S> {
    /// Create a client with its own rebuild pool of `config.rebuild_workers`.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        let rebuilds = RebuildExecutor::new(config.rebuild_workers);
        Self {
            store,
            clock,
            config,
            rebuilds,
        }
    }

    /// Settings in effect.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Background rebuild pool.
    #[must_use]
    pub const fn rebuilds(&self) -> &RebuildExecutor {
        &self.rebuilds
    }

    /// Write `value` as JSON with a physical TTL.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the store write fails.
    pub async fn set<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.store.set(key, &json, Some(ttl)).await
    }

    /// Write `value` wrapped with a logical expiry `ttl` from now and no physical TTL.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the store write fails.
    pub async fn set_with_logical_expire<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        write_logical(&*self.store, &*self.clock, key, value, ttl).await
    }

    /// Delete a key so the next read repopulates it.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be reached.
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        let existed = self.store.delete(key).await?;
        tracing::debug!(key, existed, "Cache key invalidated");
        Ok(existed)
    }

    /// Read `key_prefix + id`, loading and filling on a miss.
    ///
    /// A missing entity is cached as an empty-string tombstone for
    /// `config.null_ttl`, so repeated lookups of nonexistent ids never reach
    /// the backing store.
    ///
    /// # Errors
    ///
    /// Returns error if the store, the loader, or (de)serialization fails.
    pub async fn query_with_pass_through<ID, T, F, Fut>(
        &self,
        key_prefix: &str,
        id: ID,
        loader: F,
    ) -> Result<Option<T>>
    where
        ID: Display + Copy + Send + Sync,
        T: Serialize + DeserializeOwned + Send + Sync,
        F: Fn(ID) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Option<T>>> + Send,
    {
        let strategy = CacheStrategy::PassThrough;
        let key = format!("{key_prefix}{id}");

        match self.read_cached(&key).await? {
            Cached::Hit(value) => {
                CacheMetrics::record_request(strategy.as_str(), "hit");
                return Ok(Some(value));
            }
            Cached::Tombstone => {
                CacheMetrics::record_request(strategy.as_str(), "tombstone");
                return Ok(None);
            }
            Cached::Miss => {}
        }

        CacheMetrics::record_request(strategy.as_str(), "miss");
        self.load_and_fill(&key, id, &loader).await
    }

    /// Read with stampede protection.
    ///
    /// On a miss, only the caller holding `lock:rebuild:<key>` loads from the
    /// backing store; it re-reads the cache after acquiring the lock in case
    /// another rebuilder just finished. Everyone else sleeps
    /// `config.mutex_retry_interval` and reads again, up to
    /// `config.mutex_max_attempts` reads.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::RebuildTimedOut`] if the attempts run out
    /// - store, loader and (de)serialization failures
    pub async fn query_with_mutex<ID, T, F, Fut>(
        &self,
        key_prefix: &str,
        id: ID,
        loader: F,
    ) -> Result<Option<T>>
    where
        ID: Display + Copy + Send + Sync,
        T: Serialize + DeserializeOwned + Send + Sync,
        F: Fn(ID) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Option<T>>> + Send,
    {
        let strategy = CacheStrategy::Mutex;
        let key = format!("{key_prefix}{id}");
        let lock = DistributedLock::new(Arc::clone(&self.store), rebuild_lock_resource(&key));
        let started = Instant::now();

        for attempt in 1..=self.config.mutex_max_attempts {
            match self.read_cached(&key).await? {
                Cached::Hit(value) => {
                    CacheMetrics::record_request(strategy.as_str(), "hit");
                    return Ok(Some(value));
                }
                Cached::Tombstone => {
                    CacheMetrics::record_request(strategy.as_str(), "tombstone");
                    return Ok(None);
                }
                Cached::Miss => {}
            }

            if lock.try_lock(self.config.lock_lease).await {
                let result = self.rebuild_under_lock(&key, id, &loader).await;
                lock.unlock().await;
                CacheMetrics::record_request(strategy.as_str(), locked_read_label(&result));
                return result.map(|(value, _)| value);
            }

            tracing::trace!(key = %key, attempt, "Rebuild in progress elsewhere, waiting");
            tokio::time::sleep(self.config.mutex_retry_interval).await;
        }

        CacheMetrics::record_request(strategy.as_str(), "timeout");
        tracing::warn!(
            key = %key,
            attempts = self.config.mutex_max_attempts,
            "Gave up waiting for cache rebuild"
        );
        Err(FlashSaleError::RebuildTimedOut {
            key,
            attempts: self.config.mutex_max_attempts,
            waited: started.elapsed(),
        })
    }

    /// Read a logically expiring key; never blocks on a rebuild.
    ///
    /// - absent key → `None` (hot keys are warmed ahead of time)
    /// - fresh entry → its data
    /// - expired entry → its stale data; if this caller wins
    ///   `lock:rebuild:<key>` and the entry is still expired after acquiring
    ///   it, a rebuild is scheduled on the [`RebuildExecutor`], which writes a
    ///   fresh entry (or deletes the key if the entity is gone) and then
    ///   releases the lock
    ///
    /// # Errors
    ///
    /// Returns error if the store read or deserialization fails.
    pub async fn query_with_logical_expire<ID, T, F, Fut>(
        &self,
        key_prefix: &str,
        id: ID,
        loader: F,
    ) -> Result<Option<T>>
    where
        ID: Display + Copy + Send + Sync + 'static,
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn(ID) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let strategy = CacheStrategy::LogicalExpire;
        let key = format!("{key_prefix}{id}");

        let Some(entry) = self.read_entry::<T>(&key).await? else {
            CacheMetrics::record_request(strategy.as_str(), "miss");
            return Ok(None);
        };

        let now = self.clock.now();
        if !entry.is_expired(now) {
            CacheMetrics::record_request(strategy.as_str(), "hit");
            return Ok(Some(entry.data));
        }

        CacheMetrics::record_request(strategy.as_str(), "stale");
        let lock = DistributedLock::new(Arc::clone(&self.store), rebuild_lock_resource(&key));
        if !lock.try_lock(self.config.lock_lease).await {
            return Ok(Some(entry.data));
        }

        // Another task may have refreshed the key between our read and the lock.
        match self.read_entry::<T>(&key).await {
            Ok(Some(current)) if !current.is_expired(now) => {
                lock.unlock().await;
                return Ok(Some(current.data));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Re-read after lock failed, serving stale value");
                lock.unlock().await;
                return Ok(Some(entry.data));
            }
        }

        self.schedule_rebuild::<ID, T, F, Fut>(key, id, loader, lock);
        Ok(Some(entry.data))
    }

    /// Dispatch to the strategy's query method.
    ///
    /// # Errors
    ///
    /// Same as the selected strategy.
    pub async fn query<ID, T, F, Fut>(
        &self,
        strategy: CacheStrategy,
        key_prefix: &str,
        id: ID,
        loader: F,
    ) -> Result<Option<T>>
    where
        ID: Display + Copy + Send + Sync + 'static,
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn(ID) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        match strategy {
            CacheStrategy::PassThrough => self.query_with_pass_through(key_prefix, id, loader).await,
            CacheStrategy::Mutex => self.query_with_mutex(key_prefix, id, loader).await,
            CacheStrategy::LogicalExpire => {
                self.query_with_logical_expire(key_prefix, id, loader).await
            }
        }
    }

    async fn read_cached<T: DeserializeOwned>(&self, key: &str) -> Result<Cached<T>> {
        match self.store.get(key).await? {
            None => Ok(Cached::Miss),
            Some(json) if json.is_empty() => Ok(Cached::Tombstone),
            Some(json) => Ok(Cached::Hit(serde_json::from_str(&json)?)),
        }
    }

    async fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<ExpiringEntry<T>>> {
        match self.store.get(key).await? {
            Some(json) if !json.is_empty() => Ok(Some(serde_json::from_str(&json)?)),
            _ => Ok(None),
        }
    }

    async fn rebuild_under_lock<ID, T, F, Fut>(
        &self,
        key: &str,
        id: ID,
        loader: &F,
    ) -> Result<(Option<T>, LockedRead)>
    where
        ID: Copy + Send + Sync,
        T: Serialize + DeserializeOwned + Send + Sync,
        F: Fn(ID) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Option<T>>> + Send,
    {
        match self.read_cached(key).await? {
            Cached::Hit(value) => Ok((Some(value), LockedRead::FilledElsewhere)),
            Cached::Tombstone => Ok((None, LockedRead::FilledElsewhere)),
            Cached::Miss => Ok((self.load_and_fill(key, id, loader).await?, LockedRead::Loaded)),
        }
    }

    async fn load_and_fill<ID, T, F, Fut>(&self, key: &str, id: ID, loader: &F) -> Result<Option<T>>
    where
        ID: Copy + Send + Sync,
        T: Serialize + Send + Sync,
        F: Fn(ID) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Option<T>>> + Send,
    {
        match loader(id).await? {
            Some(value) => {
                self.set(key, &value, self.config.entity_ttl).await?;
                tracing::debug!(key, "Cache filled from backing store");
                Ok(Some(value))
            }
            None => {
                self.store.set(key, "", Some(self.config.null_ttl)).await?;
                tracing::debug!(key, "Entity absent, tombstone written");
                Ok(None)
            }
        }
    }

    fn schedule_rebuild<ID, T, F, Fut>(&self, key: String, id: ID, loader: F, lock: DistributedLock<S>)
    where
        ID: Send + Sync + 'static,
        T: Serialize + Send + Sync + 'static,
        F: Fn(ID) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let ttl = self.config.logical_ttl;

        tracing::debug!(key = %key, "Scheduling logical-expiration rebuild");
        self.rebuilds.spawn(async move {
            let outcome = match loader(id).await {
                Ok(Some(value)) => write_logical(&*store, &*clock, &key, &value, ttl)
                    .await
                    .map(|()| "rebuilt"),
                Ok(None) => store.delete(&key).await.map(|_| "removed"),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(result) => {
                    tracing::debug!(key = %key, result, "Logical-expiration rebuild finished");
                    CacheMetrics::record_rebuild(result);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Logical-expiration rebuild failed");
                    CacheMetrics::record_rebuild("failed");
                }
            }

            lock.unlock().await;
        });
    }
}

async fn write_logical<S, T>(
    store: &S,
    clock: &dyn Clock,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()>
where
    S: CoordinationStore,
    T: Serialize + Sync,
{
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| FlashSaleError::InvalidArgument(format!("logical ttl: {e}")))?;
    let entry = ExpiringEntry {
        data: value,
        expire_at: clock.now() + ttl,
    };
    let json = serde_json::to_string(&entry)?;
    store.set(key, &json, None).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use flashsale_testing::{InMemoryCoordinationStore, ManualClock, test_time};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PREFIX: &str = "cache:item:";

    fn client(
        store: &Arc<InMemoryCoordinationStore>,
        clock: &ManualClock,
    ) -> CacheClient<InMemoryCoordinationStore> {
        CacheClient::new(
            Arc::clone(store),
            Arc::new(clock.clone()),
            CacheConfig {
                mutex_retry_interval: Duration::from_millis(5),
                ..CacheConfig::default()
            },
        )
    }

    fn counting_loader(
        loads: &Arc<AtomicUsize>,
        value: Option<&'static str>,
    ) -> impl Fn(i64) -> std::future::Ready<Result<Option<String>>> + Clone + Send + Sync + 'static
    {
        let loads = Arc::clone(loads);
        move |_| {
            loads.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value.map(str::to_string)))
        }
    }

    #[tokio::test]
    async fn pass_through_fills_then_hits() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let cache = client(&store, &ManualClock::new(test_time()));
        let loads = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let value: Option<String> = cache
                .query_with_pass_through(PREFIX, 1, counting_loader(&loads, Some("apple")))
                .await
                .unwrap();
            assert_eq!(value.as_deref(), Some("apple"));
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(store.peek("cache:item:1").as_deref(), Some("\"apple\""));
        assert!(store.ttl("cache:item:1").unwrap() > keys_null_ttl());
    }

    fn keys_null_ttl() -> Duration {
        CacheConfig::default().null_ttl
    }

    #[tokio::test]
    async fn pass_through_tombstones_missing_entities() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let cache = client(&store, &ManualClock::new(test_time()));
        let loads = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let value: Option<String> = cache
                .query_with_pass_through(PREFIX, 404, counting_loader(&loads, None))
                .await
                .unwrap();
            assert!(value.is_none());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(store.peek("cache:item:404").as_deref(), Some(""));
        assert!(store.ttl("cache:item:404").unwrap() <= keys_null_ttl());
    }

    #[tokio::test]
    async fn mutex_times_out_while_lock_is_held_elsewhere() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let cache = CacheClient::new(
            Arc::clone(&store),
            Arc::new(ManualClock::new(test_time())),
            CacheConfig {
                mutex_retry_interval: Duration::from_millis(1),
                mutex_max_attempts: 3,
                ..CacheConfig::default()
            },
        );
        store
            .set_if_absent("lock:rebuild:cache:item:1", "other", Duration::from_secs(10))
            .await
            .unwrap();

        let loads = Arc::new(AtomicUsize::new(0));
        let err = cache
            .query_with_mutex::<_, String, _, _>(PREFIX, 1, counting_loader(&loads, Some("x")))
            .await
            .unwrap_err();

        assert!(matches!(err, FlashSaleError::RebuildTimedOut { attempts: 3, .. }));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mutex_releases_lock_after_rebuild() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let cache = client(&store, &ManualClock::new(test_time()));
        let loads = Arc::new(AtomicUsize::new(0));

        let value: Option<String> = cache
            .query_with_mutex(PREFIX, 2, counting_loader(&loads, Some("pear")))
            .await
            .unwrap();

        assert_eq!(value.as_deref(), Some("pear"));
        assert!(!store.contains_key("lock:rebuild:cache:item:2"));
    }

    #[test]
    fn locked_read_labels_follow_the_outcome() {
        let loaded: Result<(Option<String>, LockedRead)> = Ok((None, LockedRead::Loaded));
        let cached: Result<(Option<String>, LockedRead)> =
            Ok((Some("pear".into()), LockedRead::FilledElsewhere));
        let failed: Result<(Option<String>, LockedRead)> =
            Err(FlashSaleError::Database("connection reset".into()));

        assert_eq!(locked_read_label(&loaded), "rebuilt");
        assert_eq!(locked_read_label(&cached), "hit_after_lock");
        assert_eq!(locked_read_label(&failed), "rebuild_error");
    }

    #[tokio::test]
    async fn mutex_loader_failure_is_returned_and_lock_released() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let cache = client(&store, &ManualClock::new(test_time()));

        let err = cache
            .query_with_mutex::<_, String, _, _>(PREFIX, 5, |_| {
                std::future::ready(Err(FlashSaleError::Database("connection reset".into())))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, FlashSaleError::Database(_)));
        assert!(!store.contains_key("cache:item:5"));
        assert!(!store.contains_key("lock:rebuild:cache:item:5"));
    }

    #[tokio::test]
    async fn logical_expire_absent_key_is_not_found() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let cache = client(&store, &ManualClock::new(test_time()));
        let loads = Arc::new(AtomicUsize::new(0));

        let value: Option<String> = cache
            .query_with_logical_expire(PREFIX, 3, counting_loader(&loads, Some("kiwi")))
            .await
            .unwrap();

        assert!(value.is_none());
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logical_expire_serves_stale_then_refreshes() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let clock = ManualClock::new(test_time());
        let cache = client(&store, &clock);
        let loads = Arc::new(AtomicUsize::new(0));

        cache
            .set_with_logical_expire("cache:item:4", &"old".to_string(), Duration::from_secs(20))
            .await
            .unwrap();
        assert!(store.ttl("cache:item:4").is_none());

        clock.advance(chrono::Duration::seconds(21));
        let stale: Option<String> = cache
            .query_with_logical_expire(PREFIX, 4, counting_loader(&loads, Some("new")))
            .await
            .unwrap();
        assert_eq!(stale.as_deref(), Some("old"));

        cache.rebuilds().wait_idle().await;
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(!store.contains_key("lock:rebuild:cache:item:4"));

        let fresh: Option<String> = cache
            .query_with_logical_expire(PREFIX, 4, counting_loader(&loads, Some("newer")))
            .await
            .unwrap();
        assert_eq!(fresh.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn logical_expire_removes_deleted_entities() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let clock = ManualClock::new(test_time());
        let cache = client(&store, &clock);
        let loads = Arc::new(AtomicUsize::new(0));

        cache
            .set_with_logical_expire("cache:item:5", &"gone".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(2));

        let _: Option<String> = cache
            .query_with_logical_expire(PREFIX, 5, counting_loader(&loads, None))
            .await
            .unwrap();
        cache.rebuilds().wait_idle().await;

        assert!(!store.contains_key("cache:item:5"));
    }

    #[test]
    fn expiring_entry_wire_shape() {
        let entry = ExpiringEntry {
            data: 7,
            expire_at: test_time(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["data"], 7);
        assert_eq!(json["expireAt"], "2025-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn executor_bounds_concurrency() {
        let pool = RebuildExecutor::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        pool.wait_idle().await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.in_flight(), 0);
    }
}
