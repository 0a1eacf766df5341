//! In-memory coordination store.
//!
//! A single mutex guards the whole keyspace, so every operation (and every
//! emulated script) is atomic with respect to every other, the same guarantee
//! Redis gives a single-threaded server.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use flashsale_core::coordination::{
    AtomicScript, CoordinationStore, SECKILL_ADMITTED, SECKILL_DUPLICATE, SECKILL_OUT_OF_STOCK,
};
use flashsale_core::{FlashSaleError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    unavailable: bool,
}

impl Keyspace {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(FlashSaleError::CoordinationStore(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }

    fn purge_expired(&mut self, key: &str) {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge_expired(key);
        self.entries.get_mut(key)
    }

    fn live_or_insert(&mut self, key: &str, empty: Value) -> &mut Entry {
        self.purge_expired(key);
        self.entries.entry(key.to_string()).or_insert(Entry {
            value: empty,
            expires_at: None,
        })
    }

    fn get_str(&mut self, key: &str) -> Result<Option<String>> {
        match self.live(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn get_int(&mut self, key: &str) -> Result<i64> {
        self.get_str(key)?.map_or(Ok(0), |s| {
            s.parse::<i64>().map_err(|_| {
                FlashSaleError::CoordinationStore(format!(
                    "ERR value is not an integer or out of range: {key}"
                ))
            })
        })
    }

    /// `INCRBY` semantics: keeps an existing TTL.
    fn incr_by(&mut self, key: &str, delta: i64) -> Result<i64> {
        let next = self.get_int(key)? + delta;
        self.live_or_insert(key, Value::Str(String::new())).value = Value::Str(next.to_string());
        Ok(next)
    }

    fn set_members(&mut self, key: &str) -> Result<Option<&mut HashSet<String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(Some(members)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn seckill(&mut self, stock_key: &str, order_key: &str, user: &str) -> Result<i64> {
        if self.get_int(stock_key)? <= 0 {
            return Ok(SECKILL_OUT_OF_STOCK);
        }
        if self
            .set_members(order_key)?
            .is_some_and(|members| members.contains(user))
        {
            return Ok(SECKILL_DUPLICATE);
        }
        self.incr_by(stock_key, -1)?;
        let entry = self.live_or_insert(order_key, Value::Set(HashSet::new()));
        let Value::Set(members) = &mut entry.value else {
            return Err(wrong_type(order_key));
        };
        members.insert(user.to_string());
        Ok(SECKILL_ADMITTED)
    }

    fn seckill_rollback(&mut self, stock_key: &str, order_key: &str, user: &str) -> Result<i64> {
        let removed = self
            .set_members(order_key)?
            .is_some_and(|members| members.remove(user));
        if removed {
            self.incr_by(stock_key, 1)?;
            return Ok(1);
        }
        Ok(0)
    }

    fn release_lock(&mut self, lock_key: &str, token: &str) -> Result<i64> {
        if self.get_str(lock_key)?.as_deref() == Some(token) {
            self.entries.remove(lock_key);
            return Ok(1);
        }
        Ok(0)
    }
}

fn wrong_type(key: &str) -> FlashSaleError {
    FlashSaleError::CoordinationStore(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
    ))
}

fn arg<'a>(values: &[&'a str], index: usize, script: AtomicScript) -> Result<&'a str> {
    values.get(index).copied().ok_or_else(|| {
        FlashSaleError::CoordinationStore(format!(
            "script {} missing argument {index}",
            script.name()
        ))
    })
}

/// In-memory stand-in for the Redis coordination store.
///
/// Supports string, hash and set values with millisecond TTLs, and emulates
/// each [`AtomicScript`] under the keyspace mutex. Clones share state.
///
/// # Failure injection
///
/// [`set_unavailable`](Self::set_unavailable) makes every operation fail with
/// [`FlashSaleError::CoordinationStore`], for fail-closed tests.
///
/// # Example
///
/// ```
/// use flashsale_testing::InMemoryCoordinationStore;
/// use flashsale_core::coordination::{AtomicScript, CoordinationStore, SECKILL_ADMITTED};
///
/// # async fn example() -> flashsale_core::Result<()> {
/// let store = InMemoryCoordinationStore::new();
/// store.set("seckill:stock:1", "1", None).await?;
///
/// let code = store
///     .eval(AtomicScript::Seckill, &["seckill:stock:1", "seckill:order:1"], &["7"])
///     .await?;
/// assert_eq!(code, SECKILL_ADMITTED);
/// assert!(store.is_member("seckill:order:1", "7"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryCoordinationStore {
    keyspace: Arc<Mutex<Keyspace>>,
    eval_calls: Arc<AtomicUsize>,
}

impl InMemoryCoordinationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.keyspace.lock().unwrap().unavailable = unavailable;
    }

    /// Whether a live key exists
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.keyspace.lock().unwrap().live(key).is_some()
    }

    /// String value of a live key, ignoring outage
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<String> {
        self.keyspace.lock().unwrap().get_str(key).ok().flatten()
    }

    /// Whether `member` belongs to the set at `key`
    #[must_use]
    pub fn is_member(&self, key: &str, member: &str) -> bool {
        self.keyspace
            .lock()
            .unwrap()
            .set_members(key)
            .ok()
            .flatten()
            .is_some_and(|m| m.contains(member))
    }

    /// Cardinality of the set at `key` (0 if absent)
    #[must_use]
    pub fn set_len(&self, key: &str) -> usize {
        self.keyspace
            .lock()
            .unwrap()
            .set_members(key)
            .ok()
            .flatten()
            .map_or(0, |m| m.len())
    }

    /// Remaining TTL of a live key; `None` if absent or persistent
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut keyspace = self.keyspace.lock().unwrap();
        let now = Instant::now();
        keyspace
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Force a key to expire now
    pub fn expire_now(&self, key: &str) {
        self.keyspace.lock().unwrap().entries.remove(key);
    }

    /// Number of script evaluations so far
    #[must_use]
    pub fn eval_calls(&self) -> usize {
        self.eval_calls.load(Ordering::SeqCst)
    }
}

impl CoordinationStore for InMemoryCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut keyspace = self.keyspace.lock().unwrap();
        keyspace.check_available()?;
        keyspace.get_str(key)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut keyspace = self.keyspace.lock().unwrap();
        keyspace.check_available()?;
        keyspace.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut keyspace = self.keyspace.lock().unwrap();
        keyspace.check_available()?;
        if keyspace.live(key).is_some() {
            return Ok(false);
        }
        keyspace.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut keyspace = self.keyspace.lock().unwrap();
        keyspace.check_available()?;
        let existed = keyspace.live(key).is_some();
        keyspace.entries.remove(key);
        Ok(existed)
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut keyspace = self.keyspace.lock().unwrap();
        keyspace.check_available()?;
        keyspace.incr_by(key, 1)
    }

    async fn hash_set_all(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut keyspace = self.keyspace.lock().unwrap();
        keyspace.check_available()?;
        let entry = keyspace.live_or_insert(key, Value::Hash(HashMap::new()));
        let Value::Hash(hash) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        for (field, value) in fields {
            hash.insert((*field).to_string(), value.clone());
        }
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut keyspace = self.keyspace.lock().unwrap();
        keyspace.check_available()?;
        match keyspace.live(key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn eval(&self, script: AtomicScript, keys: &[&str], args: &[&str]) -> Result<i64> {
        self.eval_calls.fetch_add(1, Ordering::SeqCst);
        let mut keyspace = self.keyspace.lock().unwrap();
        keyspace.check_available()?;
        match script {
            AtomicScript::Seckill => keyspace.seckill(
                arg(keys, 0, script)?,
                arg(keys, 1, script)?,
                arg(args, 0, script)?,
            ),
            AtomicScript::SeckillRollback => keyspace.seckill_rollback(
                arg(keys, 0, script)?,
                arg(keys, 1, script)?,
                arg(args, 0, script)?,
            ),
            AtomicScript::ReleaseLock => {
                keyspace.release_lock(arg(keys, 0, script)?, arg(args, 0, script)?)
            }
        }
    }
}
