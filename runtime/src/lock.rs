//! Distributed mutual exclusion over the coordination store.
//!
//! A lock is a key `lock:<resource>` holding an opaque holder token, written
//! with "set if absent" and a lease. There is no blocking or retry in the
//! primitive; callers choose their own wait policy.
//!
//! Release is fenced: the key is deleted only if it still holds this
//! instance's token, so a holder whose lease already expired cannot delete
//! the lock of whoever acquired it next.
//!
//! # Example
//!
//! ```no_run
//! use flashsale_runtime::lock::DistributedLock;
//! use flashsale_core::coordination::CoordinationStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example<S: CoordinationStore>(store: Arc<S>) {
//! let lock = DistributedLock::new(store, "order:42");
//! if lock.try_lock(Duration::from_secs(10)).await {
//!     // critical section
//!     lock.unlock().await;
//! }
//! # }
//! ```

use crate::metrics::LockMetrics;
use flashsale_core::coordination::{AtomicScript, CoordinationStore};
use flashsale_core::keys::LOCK_KEY_PREFIX;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Lease-based lock on one named resource.
///
/// Each instance carries its own holder token; create one instance per
/// critical section.
#[derive(Debug)]
pub struct DistributedLock<S> {
    store: Arc<S>,
    key: String,
    token: String,
}

impl<S: CoordinationStore> DistributedLock<S> {
    /// Lock handle for `resource` with a fresh holder token.
    #[must_use]
    pub fn new(store: Arc<S>, resource: impl AsRef<str>) -> Self {
        Self {
            store,
            key: format!("{LOCK_KEY_PREFIX}{}", resource.as_ref()),
            token: Uuid::new_v4().to_string(),
        }
    }

    /// Full coordination-store key of this lock.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Holder token written into the lock key.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Try to acquire the lock once.
    ///
    /// Returns `true` iff the key was absent and now holds this instance's
    /// token with the given lease. A store failure counts as not acquired.
    pub async fn try_lock(&self, lease: Duration) -> bool {
        match self.store.set_if_absent(&self.key, &self.token, lease).await {
            Ok(true) => {
                LockMetrics::record_attempt("acquired");
                tracing::trace!(key = %self.key, "Lock acquired");
                true
            }
            Ok(false) => {
                LockMetrics::record_attempt("contended");
                tracing::debug!(key = %self.key, "Lock held by another holder");
                false
            }
            Err(e) => {
                LockMetrics::record_attempt("error");
                tracing::warn!(key = %self.key, error = %e, "Lock acquisition failed, treating as not acquired");
                false
            }
        }
    }

    /// Release the lock if this instance still holds it.
    ///
    /// Returns `true` if the key was deleted. A store failure is logged and the
    /// lock is left to expire with its lease.
    pub async fn unlock(&self) -> bool {
        match self
            .store
            .eval(AtomicScript::ReleaseLock, &[self.key.as_str()], &[self.token.as_str()])
            .await
        {
            Ok(1) => {
                tracing::trace!(key = %self.key, "Lock released");
                true
            }
            Ok(_) => {
                tracing::warn!(key = %self.key, "Lock no longer held at release (lease expired)");
                false
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Lock release failed, lease will expire");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use flashsale_testing::InMemoryCoordinationStore;

    const LEASE: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn second_holder_is_refused_until_release() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let first = DistributedLock::new(Arc::clone(&store), "order:1");
        let second = DistributedLock::new(Arc::clone(&store), "order:1");

        assert!(first.try_lock(LEASE).await);
        assert!(!second.try_lock(LEASE).await);
        assert_eq!(store.peek("lock:order:1").as_deref(), Some(first.token()));

        assert!(first.unlock().await);
        assert!(second.try_lock(LEASE).await);
    }

    #[tokio::test]
    async fn distinct_resources_do_not_contend() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let a = DistributedLock::new(Arc::clone(&store), "order:1");
        let b = DistributedLock::new(Arc::clone(&store), "order:2");
        assert!(a.try_lock(LEASE).await);
        assert!(b.try_lock(LEASE).await);
    }

    #[tokio::test]
    async fn expired_holder_cannot_release_successor() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let stale = DistributedLock::new(Arc::clone(&store), "rebuild:cache:shop:1");
        let successor = DistributedLock::new(Arc::clone(&store), "rebuild:cache:shop:1");

        assert!(stale.try_lock(LEASE).await);
        store.expire_now(stale.key());
        assert!(successor.try_lock(LEASE).await);

        assert!(!stale.unlock().await);
        assert_eq!(
            store.peek(successor.key()).as_deref(),
            Some(successor.token())
        );
    }

    #[tokio::test]
    async fn lease_expires_without_unlock() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let crashed = DistributedLock::new(Arc::clone(&store), "order:7");
        let next = DistributedLock::new(Arc::clone(&store), "order:7");

        assert!(crashed.try_lock(Duration::from_millis(20)).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(next.try_lock(LEASE).await);
    }

    #[tokio::test]
    async fn store_outage_fails_closed() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        store.set_unavailable(true);
        let lock = DistributedLock::new(Arc::clone(&store), "order:1");
        assert!(!lock.try_lock(LEASE).await);
        assert!(!lock.unlock().await);
    }
}
