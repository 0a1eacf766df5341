//! Order log: the hand-off between admission and commit.
//!
//! Admission publishes each accepted [`VoucherOrder`]; a single consumer drains
//! the log and commits orders to the backing store. Two implementations exist:
//!
//! - a bounded in-process queue (`flashsale-runtime`), lost on process exit
//! - a durable Redpanda topic (`flashsale-redpanda`), at-least-once delivery
//!
//! # Acknowledgement
//!
//! Each [`OrderDelivery`] may carry an acknowledgement handle. The consumer calls
//! [`OrderDelivery::ack`] once the order reached a terminal outcome (committed,
//! rejected as duplicate, or dropped after logging). Durable logs only advance
//! their consumer offset on ack, so an order that was never acked is
//! redelivered after a restart. Redelivery is safe because the commit unit is
//! idempotent per `(user_id, voucher_id)`.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! log.publish(&order).await?;
//!
//! let mut stream = log.subscribe().await?;
//! while let Some(delivery) = stream.next().await {
//!     let delivery = delivery?;
//!     commit(delivery.order()).await;
//!     delivery.ack();
//! }
//! ```

use crate::error::FlashSaleError;
use crate::types::VoucherOrder;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during order log operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderLogError {
    /// Failed to connect to the log
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an order
    #[error("Publish failed for order {order_id}: {reason}")]
    PublishFailed {
        /// Order that could not be published
        order_id: i64,
        /// The reason for failure
        reason: String,
    },

    /// Failed to open the consumer side
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// A payload could not be decoded into a [`VoucherOrder`]
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// The bounded in-process queue has no free slot
    #[error("Queue full (capacity {capacity})")]
    QueueFull {
        /// Configured capacity
        capacity: usize,
    },

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl From<OrderLogError> for FlashSaleError {
    fn from(e: OrderLogError) -> Self {
        match e {
            OrderLogError::QueueFull { capacity } => Self::QueueFull { capacity },
            OrderLogError::DeserializationFailed(reason) => Self::Serialization(reason),
            other => Self::OrderLog(other.to_string()),
        }
    }
}

/// One order handed to the consumer, with an optional acknowledgement handle.
#[derive(Debug)]
pub struct OrderDelivery {
    order: VoucherOrder,
    ack: Option<oneshot::Sender<()>>,
}

impl OrderDelivery {
    /// Delivery that needs no acknowledgement (in-process queue).
    #[must_use]
    pub const fn new(order: VoucherOrder) -> Self {
        Self { order, ack: None }
    }

    /// Delivery whose producer waits on `ack` before advancing its offset.
    #[must_use]
    pub const fn with_ack(order: VoucherOrder, ack: oneshot::Sender<()>) -> Self {
        Self {
            order,
            ack: Some(ack),
        }
    }

    /// The delivered order.
    #[must_use]
    pub const fn order(&self) -> &VoucherOrder {
        &self.order
    }

    /// Mark the order as fully handled.
    pub fn ack(mut self) {
        if let Some(tx) = self.ack.take() {
            // Receiver gone means the consumer task is shutting down; offset stays put.
            let _ = tx.send(());
        }
    }
}

/// Stream of deliveries from [`OrderLog::subscribe`].
pub type OrderStream = Pin<Box<dyn Stream<Item = Result<OrderDelivery, OrderLogError>> + Send>>;

/// Hand-off channel between the admission path and the commit worker.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the service can hold an
/// `Arc<dyn OrderLog>` and swap the in-process queue for a durable log
/// through configuration.
pub trait OrderLog: Send + Sync {
    /// Append an admitted order.
    ///
    /// # Errors
    ///
    /// Returns [`OrderLogError::QueueFull`] if a bounded queue is saturated, or a
    /// transport error if a durable log rejects the write. On error the order
    /// was not accepted and the caller must undo its reservation.
    fn publish<'a>(
        &'a self,
        order: &'a VoucherOrder,
    ) -> Pin<Box<dyn Future<Output = Result<(), OrderLogError>> + Send + 'a>>;

    /// Open the single consumer stream.
    ///
    /// # Errors
    ///
    /// Returns [`OrderLogError::SubscriptionFailed`] if the stream cannot be
    /// opened or a consumer is already attached.
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<OrderStream, OrderLogError>> + Send + '_>>;
}
