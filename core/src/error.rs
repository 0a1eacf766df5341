//! Error types for the flash-sale pipeline.

use crate::types::{OrderId, VoucherId};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for flash-sale operations.
pub type Result<T> = std::result::Result<T, FlashSaleError>;

/// Broad failure category.
///
/// Callers branch on the category rather than on individual variants:
/// contention is retried by policy, validation is reported to the caller,
/// infrastructure is propagated (and fails closed on the admission path),
/// integrity is logged and the offending item dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Expected under load, e.g. a lock that is already held.
    Contention,
    /// Terminal business rejection.
    Validation,
    /// A collaborator (coordination store, database, log) is unreachable or failing.
    Infrastructure,
    /// Durable state disagrees with an earlier admission decision.
    Integrity,
}

/// Error taxonomy for admission, caching and order commit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashSaleError {
    // ═══════════════════════════════════════════════════════════
    // Contention
    // ═══════════════════════════════════════════════════════════

    /// A distributed lock is held by another holder.
    #[error("Lock contended: {resource}")]
    LockContended {
        /// Resource the lock guards
        resource: String,
    },

    /// A mutex-guarded cache rebuild did not finish within the retry budget.
    #[error("Cache rebuild for '{key}' timed out after {attempts} attempts ({waited:?})")]
    RebuildTimedOut {
        /// Cache key being rebuilt
        key: String,
        /// Number of read attempts made
        attempts: usize,
        /// Total time spent waiting
        waited: Duration,
    },

    // ═══════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════

    /// The seckill voucher does not exist.
    #[error("Seckill voucher {0} not found")]
    VoucherNotFound(VoucherId),

    /// A caller supplied an argument that can never succeed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ═══════════════════════════════════════════════════════════
    // Infrastructure
    // ═══════════════════════════════════════════════════════════

    /// Coordination store (Redis) operation failed.
    #[error("Coordination store error: {0}")]
    CoordinationStore(String),

    /// Backing database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Order log publish/subscribe failed.
    #[error("Order log error: {0}")]
    OrderLog(String),

    /// Value could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The in-process order queue has no free slot.
    #[error("Order queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// The per-day ID sequence no longer fits in the sequence bits.
    #[error("ID sequence exhausted for prefix '{prefix}' (counter {counter})")]
    SequenceExhausted {
        /// Generator key prefix
        prefix: String,
        /// Counter value returned by the store
        counter: i64,
    },

    // ═══════════════════════════════════════════════════════════
    // Integrity
    // ═══════════════════════════════════════════════════════════

    /// Durable state contradicts an admission that already happened.
    #[error("Integrity violation for order {order_id}: {reason}")]
    Integrity {
        /// Order being processed
        order_id: OrderId,
        /// What was inconsistent
        reason: String,
    },
}

impl FlashSaleError {
    /// Category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::LockContended { .. } | Self::RebuildTimedOut { .. } => ErrorKind::Contention,
            Self::VoucherNotFound(_) | Self::InvalidArgument(_) => ErrorKind::Validation,
            Self::CoordinationStore(_)
            | Self::Database(_)
            | Self::OrderLog(_)
            | Self::Serialization(_)
            | Self::QueueFull { .. }
            | Self::SequenceExhausted { .. } => ErrorKind::Infrastructure,
            Self::Integrity { .. } => ErrorKind::Integrity,
        }
    }

    /// Returns `true` if retrying the same operation may succeed.
    ///
    /// Serialization failures and a saturated queue are infrastructure errors
    /// but retrying them immediately cannot help.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flashsale_core::FlashSaleError;
    /// assert!(FlashSaleError::Database("connection reset".into()).is_retryable());
    /// assert!(!FlashSaleError::InvalidArgument("id".into()).is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CoordinationStore(_) | Self::Database(_) | Self::OrderLog(_)
        )
    }
}

impl From<serde_json::Error> for FlashSaleError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
