//! Coordination store abstraction.
//!
//! The coordination store is the shared, fast key-value service (Redis in
//! production) that holds all hot state: cache entries, locks, ID counters,
//! stock counters and admitted-user sets.
//!
//! # Atomic scripts
//!
//! Multi-key decisions never happen client-side. They run as server-side
//! scripts ([`AtomicScript`]) so that no other client observes a partial
//! effect. Each script ships its Lua body with this crate; the in-memory
//! implementation in `flashsale-testing` emulates the same semantics under a
//! single mutex.
//!
//! # Example
//!
//! ```no_run
//! use flashsale_core::coordination::{AtomicScript, CoordinationStore};
//! use std::time::Duration;
//!
//! # async fn example(store: impl CoordinationStore) -> flashsale_core::Result<()> {
//! store.set("seckill:stock:1", "100", None).await?;
//! let code = store
//!     .eval(AtomicScript::Seckill, &["seckill:stock:1", "seckill:order:1"], &["42"])
//!     .await?;
//! assert_eq!(code, 0);
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Server-side scripts executed atomically by the coordination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicScript {
    /// Flash-sale admission: stock check, duplicate check, reserve.
    ///
    /// `KEYS = [stock_key, order_set_key]`, `ARGV = [user_id]`.
    /// Returns [`SECKILL_ADMITTED`], [`SECKILL_OUT_OF_STOCK`] or [`SECKILL_DUPLICATE`].
    Seckill,
    /// Undo a reservation whose order could not be handed off.
    ///
    /// `KEYS = [stock_key, order_set_key]`, `ARGV = [user_id]`.
    /// Returns 1 if undone, 0 if the user held no reservation.
    SeckillRollback,
    /// Delete a lock only if it is still held by the given token.
    ///
    /// `KEYS = [lock_key]`, `ARGV = [token]`. Returns 1 if released.
    ReleaseLock,
}

/// [`AtomicScript::Seckill`] result: stock reserved.
pub const SECKILL_ADMITTED: i64 = 0;
/// [`AtomicScript::Seckill`] result: no stock left.
pub const SECKILL_OUT_OF_STOCK: i64 = 1;
/// [`AtomicScript::Seckill`] result: user already admitted.
pub const SECKILL_DUPLICATE: i64 = 2;

impl AtomicScript {
    /// Lua source evaluated by Redis.
    #[must_use]
    pub const fn source(self) -> &'static str {
        match self {
            Self::Seckill => include_str!("scripts/seckill.lua"),
            Self::SeckillRollback => include_str!("scripts/seckill_rollback.lua"),
            Self::ReleaseLock => include_str!("scripts/release_lock.lua"),
        }
    }

    /// Script name for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Seckill => "seckill",
            Self::SeckillRollback => "seckill_rollback",
            Self::ReleaseLock => "release_lock",
        }
    }
}

/// Shared key-value coordination store.
///
/// Every method maps a transport failure to
/// [`FlashSaleError::CoordinationStore`](crate::FlashSaleError::CoordinationStore).
///
/// # Thread Safety
///
/// Implementations are shared behind `Arc` by request handlers, the commit
/// worker and cache-rebuild tasks, so they must be `Send + Sync + 'static`.
pub trait CoordinationStore: Send + Sync + 'static {
    /// Read a string value. `None` if the key is absent or expired.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be reached.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Write a string value, replacing any previous value and TTL.
    ///
    /// `ttl = None` stores the value without expiry.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be reached.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Write a value with a TTL only if the key does not exist.
    ///
    /// Returns `true` iff the key was absent and is now set.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be reached.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Delete a key. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be reached.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Atomically increment an integer counter (absent counts as 0).
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be reached or the value is not an integer.
    fn increment(&self, key: &str) -> impl Future<Output = Result<i64>> + Send;

    /// Set several hash fields at once, optionally (re)setting the key TTL.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be reached.
    fn hash_set_all(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Read all fields of a hash. Empty map if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be reached.
    fn hash_get_all(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<HashMap<String, String>>> + Send;

    /// Execute an [`AtomicScript`] with no partial-effect visibility to other clients.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be reached or the script fails.
    fn eval(
        &self,
        script: AtomicScript,
        keys: &[&str],
        args: &[&str],
    ) -> impl Future<Output = Result<i64>> + Send;
}
