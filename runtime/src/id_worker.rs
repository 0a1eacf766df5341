//! Time-ordered unique ID generation.
//!
//! An ID is `(seconds since 2022-01-01T00:00:00Z) << 32 | sequence`, where the
//! sequence comes from an atomic per-prefix, per-day counter in the
//! coordination store (`icr:<prefix>:<yyyy:MM:dd>`). Day-qualified keys
//! partition the sequence space without any cleanup job.

use flashsale_core::coordination::CoordinationStore;
use flashsale_core::environment::Clock;
use flashsale_core::keys::ID_COUNTER_KEY;
use flashsale_core::types::COUNT_BITS;
use flashsale_core::{FlashSaleError, OrderId, Result};
use std::sync::Arc;

/// 2022-01-01T00:00:00Z in Unix seconds.
pub const BEGIN_TIMESTAMP: i64 = 1_640_995_200;

const MAX_SEQUENCE: i64 = (1 << COUNT_BITS) - 1;

/// Generator of [`OrderId`]s.
pub struct IdWorker<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: CoordinationStore> IdWorker<S> {
    /// Create a generator over `store`, reading time from `clock`.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Next identifier for `prefix`.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::CoordinationStore`] if the counter cannot be incremented
    /// - [`FlashSaleError::SequenceExhausted`] if today's counter exceeds 32 bits
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use flashsale_runtime::id_worker::IdWorker;
    /// # use flashsale_core::coordination::CoordinationStore;
    /// # async fn example<S: CoordinationStore>(ids: IdWorker<S>) -> flashsale_core::Result<()> {
    /// let id = ids.next_id("order").await?;
    /// assert!(id.sequence() >= 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn next_id(&self, prefix: &str) -> Result<OrderId> {
        let now = self.clock.now();
        let timestamp = now.timestamp() - BEGIN_TIMESTAMP;
        let key = format!("{ID_COUNTER_KEY}{prefix}:{}", now.format("%Y:%m:%d"));

        let counter = self.store.increment(&key).await?;
        if !(0..=MAX_SEQUENCE).contains(&counter) {
            tracing::error!(prefix, counter, "ID sequence exhausted");
            return Err(FlashSaleError::SequenceExhausted {
                prefix: prefix.to_string(),
                counter,
            });
        }

        Ok(OrderId::compose(timestamp, counter))
    }
}
