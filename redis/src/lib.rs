//! Redis coordination store for the flash-sale pipeline.
//!
//! Implements [`CoordinationStore`] over a multiplexed
//! [`ConnectionManager`] that reconnects on its own. Atomic scripts are
//! registered as [`redis::Script`]s, so they run through `EVALSHA` and are
//! loaded on first use.
//!
//! # Example
//!
//! ```no_run
//! use flashsale_redis::RedisCoordinationStore;
//! use flashsale_core::coordination::CoordinationStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisCoordinationStore::new("redis://127.0.0.1:6379").await?;
//! let acquired = store
//!     .set_if_absent("lock:order:42", "token", Duration::from_secs(10))
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use flashsale_core::coordination::{AtomicScript, CoordinationStore};
use flashsale_core::{FlashSaleError, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::collections::HashMap;
use std::time::Duration;

/// Prepared server-side scripts.
struct Scripts {
    seckill: Script,
    seckill_rollback: Script,
    release_lock: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            seckill: Script::new(AtomicScript::Seckill.source()),
            seckill_rollback: Script::new(AtomicScript::SeckillRollback.source()),
            release_lock: Script::new(AtomicScript::ReleaseLock.source()),
        }
    }

    const fn get(&self, script: AtomicScript) -> &Script {
        match script {
            AtomicScript::Seckill => &self.seckill,
            AtomicScript::SeckillRollback => &self.seckill_rollback,
            AtomicScript::ReleaseLock => &self.release_lock,
        }
    }
}

/// `Redis`-backed [`CoordinationStore`].
#[derive(Clone)]
pub struct RedisCoordinationStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    scripts: std::sync::Arc<Scripts>,
}

impl RedisCoordinationStore {
    /// Connect to `Redis`.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - `Redis` connection URL (e.g., "<redis://127.0.0.1:6379>")
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::CoordinationStore`] if the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            FlashSaleError::CoordinationStore(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            FlashSaleError::CoordinationStore(format!(
                "Failed to create Redis connection manager: {e}"
            ))
        })?;

        tracing::info!("Connected to Redis");
        Ok(Self {
            conn_manager,
            scripts: std::sync::Arc::new(Scripts::load()),
        })
    }
}

fn store_error(op: &str, key: &str, e: &RedisError) -> FlashSaleError {
    tracing::warn!(op, key, error = %e, "Redis command failed");
    FlashSaleError::CoordinationStore(format!("{op} {key}: {e}"))
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl CoordinationStore for RedisCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        conn.get(key).await.map_err(|e| store_error("GET", key, &e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let result: redis::RedisResult<()> = match ttl {
            Some(ttl) => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(millis(ttl))
                    .query_async(&mut conn)
                    .await
            }
            None => conn.set(key, value).await,
        };
        result.map_err(|e| store_error("SET", key, &e))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        // SET NX PX replies OK when written and nil otherwise.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("SET NX", key, &e))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = conn.del(key).await.map_err(|e| store_error("DEL", key, &e))?;
        Ok(removed > 0)
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn_manager.clone();
        conn.incr(key, 1_i64)
            .await
            .map_err(|e| store_error("INCR", key, &e))
    }

    async fn hash_set_all(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().hset_multiple(key, fields).ignore();
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl)).ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("HSET", key, &e))?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn_manager.clone();
        conn.hgetall(key)
            .await
            .map_err(|e| store_error("HGETALL", key, &e))
    }

    async fn eval(&self, script: AtomicScript, keys: &[&str], args: &[&str]) -> Result<i64> {
        let mut conn = self.conn_manager.clone();
        let mut invocation = self.scripts.get(script).prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(*arg);
        }

        let first_key = keys.first().copied().unwrap_or_default();
        let code: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error(script.name(), first_key, &e))?;
        tracing::trace!(script = script.name(), key = first_key, code, "Script evaluated");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use flashsale_core::coordination::{SECKILL_ADMITTED, SECKILL_DUPLICATE, SECKILL_OUT_OF_STOCK};

    // Note: These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    async fn store() -> RedisCoordinationStore {
        RedisCoordinationStore::new("redis://127.0.0.1:6379")
            .await
            .unwrap()
    }

    fn unique(prefix: &str) -> String {
        format!("test:{prefix}:{}", uuid::Uuid::new_v4())
    }

    #[test]
    fn ttl_rounds_up_to_one_millisecond() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_secs(10)), 10_000);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_set_if_absent_and_fenced_release() {
        let store = store().await;
        let key = unique("lock");

        assert!(store.set_if_absent(&key, "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent(&key, "b", Duration::from_secs(5)).await.unwrap());

        let released = store.eval(AtomicScript::ReleaseLock, &[&key], &["b"]).await.unwrap();
        assert_eq!(released, 0);
        let released = store.eval(AtomicScript::ReleaseLock, &[&key], &["a"]).await.unwrap();
        assert_eq!(released, 1);
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_seckill_script_codes() {
        let store = store().await;
        let stock = unique("stock");
        let orders = unique("orders");
        store.set(&stock, "1", Some(Duration::from_secs(60))).await.unwrap();

        let keys = [stock.as_str(), orders.as_str()];
        assert_eq!(store.eval(AtomicScript::Seckill, &keys, &["1"]).await.unwrap(), SECKILL_ADMITTED);
        assert_eq!(store.eval(AtomicScript::Seckill, &keys, &["2"]).await.unwrap(), SECKILL_OUT_OF_STOCK);

        store.set(&stock, "5", Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(store.eval(AtomicScript::Seckill, &keys, &["1"]).await.unwrap(), SECKILL_DUPLICATE);

        assert_eq!(store.eval(AtomicScript::SeckillRollback, &keys, &["1"]).await.unwrap(), 1);
        assert_eq!(store.get(&stock).await.unwrap().as_deref(), Some("6"));

        store.delete(&stock).await.unwrap();
        store.delete(&orders).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_hash_and_counter() {
        let store = store().await;
        let hash = unique("window");
        let counter = unique("icr");

        store
            .hash_set_all(
                &hash,
                &[("begin", "2025-01-01T00:00:00+00:00".into()), ("end", "2025-01-02T00:00:00+00:00".into())],
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        let fields = store.hash_get_all(&hash).await.unwrap();
        assert_eq!(fields.len(), 2);
        assert!(store.hash_get_all(&unique("missing")).await.unwrap().is_empty());

        assert_eq!(store.increment(&counter).await.unwrap(), 1);
        assert_eq!(store.increment(&counter).await.unwrap(), 2);

        assert!(store.delete(&hash).await.unwrap());
        assert!(store.delete(&counter).await.unwrap());
        assert!(!store.delete(&counter).await.unwrap());
    }
}
