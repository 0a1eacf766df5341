//! Durable Redpanda order log for the flash-sale pipeline.
//!
//! Implements [`OrderLog`] over a single Kafka-compatible topic using
//! rdkafka. Orders are bincode-encoded and keyed by user id, so every order
//! of one user lands on the same partition.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - The consumer task hands each order to the subscriber and waits for
//!   [`OrderDelivery::ack`] before committing its offset
//! - If the process crashes before commit, the order is redelivered
//! - A delivery dropped without ack while the stream is still consumed is
//!   rewound and delivered again
//! - The commit worker is idempotent per `(user_id, voucher_id)`, so
//!   redelivery never creates a second order
//! - Undecodable payloads are reported on the stream and committed, so one
//!   poison message cannot stall the partition
//!
//! # Example
//!
//! ```no_run
//! use flashsale_redpanda::RedpandaOrderLog;
//! use flashsale_core::order_log::OrderLog;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = RedpandaOrderLog::builder()
//!     .brokers("localhost:9092")
//!     .topic("voucher-orders")
//!     .consumer_group("order-commit")
//!     .build()?;
//!
//! let mut stream = log.subscribe().await?;
//! while let Some(delivery) = stream.next().await {
//!     let delivery = delivery?;
//!     println!("order {}", delivery.order().id);
//!     delivery.ack();
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use flashsale_core::order_log::{OrderDelivery, OrderLog, OrderLogError, OrderStream};
use flashsale_core::VoucherOrder;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Offset;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Default topic for admitted orders.
pub const DEFAULT_TOPIC: &str = "voucher-orders";

/// Default consumer group of the commit worker.
pub const DEFAULT_CONSUMER_GROUP: &str = "order-commit-worker";

const DEFAULT_BUFFER_SIZE: usize = 1000;

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Redpanda-backed [`OrderLog`].
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Topic**: Where orders are appended (default: `voucher-orders`)
/// - **Consumer group**: Shared by all commit workers (default: `order-commit-worker`)
/// - **Producer acks**: Default `"all"`, an admitted order must survive a broker loss
/// - **Offset reset**: Where a new group starts (default: `"earliest"`)
pub struct RedpandaOrderLog {
    /// Kafka producer for publishing orders
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    topic: String,
    consumer_group: String,
    /// Producer timeout
    timeout: Duration,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaOrderLog {
    /// Create an order log with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OrderLogError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, OrderLogError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the order log.
    #[must_use]
    pub fn builder() -> RedpandaOrderLogBuilder {
        RedpandaOrderLogBuilder::default()
    }

    /// Broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Topic orders are appended to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consumer group used by [`OrderLog::subscribe`].
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }
}

/// Builder for configuring a [`RedpandaOrderLog`].
///
/// # Example
///
/// ```no_run
/// use flashsale_redpanda::RedpandaOrderLog;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = RedpandaOrderLog::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .topic("voucher-orders")
///     .producer_acks("all")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaOrderLogBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaOrderLogBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the order topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the consumer group ID.
    ///
    /// Every commit worker instance joins the same group, so partitions are
    /// spread across instances and each order is committed by one of them.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how many decoded orders may wait between the consumer task and
    /// the subscriber. A zero size is raised to one.
    ///
    /// Default: 1000
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set where a new consumer group starts reading: `"earliest"`, `"latest"` or `"error"`.
    ///
    /// Default: `"earliest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaOrderLog`].
    ///
    /// # Errors
    ///
    /// Returns [`OrderLogError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaOrderLog, OrderLogError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| OrderLogError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .set("enable.idempotence", if acks == "all" { "true" } else { "false" })
            .create()
            .map_err(|e| {
                OrderLogError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let log = RedpandaOrderLog {
            producer,
            brokers,
            topic: self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            timeout,
            buffer_size: self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        };

        tracing::info!(
            brokers = %log.brokers,
            topic = %log.topic,
            consumer_group = %log.consumer_group,
            acks = %acks,
            "RedpandaOrderLog created"
        );
        Ok(log)
    }
}

/// Encode an order as a message payload.
fn encode_order(order: &VoucherOrder) -> Result<Vec<u8>, OrderLogError> {
    bincode::serialize(order).map_err(|e| OrderLogError::PublishFailed {
        order_id: order.id.get(),
        reason: format!("Failed to serialize order: {e}"),
    })
}

/// Decode a message payload into an order.
fn decode_order(payload: Option<&[u8]>) -> Result<VoucherOrder, OrderLogError> {
    let payload = payload
        .ok_or_else(|| OrderLogError::DeserializationFailed("Message has no payload".to_string()))?;
    bincode::deserialize(payload)
        .map_err(|e| OrderLogError::DeserializationFailed(format!("Failed to deserialize order: {e}")))
}

fn commit(consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
    if let Err(e) = consumer.commit_message(message, CommitMode::Async) {
        tracing::warn!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            error = %e,
            "Failed to commit offset (order may be redelivered)"
        );
    }
}

/// Own the consumer and forward decoded orders until the subscriber goes away.
async fn forward_orders(consumer: StreamConsumer, tx: mpsc::Sender<Result<OrderDelivery, OrderLogError>>) {
    use futures::StreamExt;

    let mut stream = consumer.stream();
    while let Some(msg_result) = stream.next().await {
        let message = match msg_result {
            Ok(message) => message,
            Err(e) => {
                let err = OrderLogError::TransportError(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let order = match decode_order(message.payload()) {
            Ok(order) => order,
            Err(err) => {
                tracing::error!(
                    partition = message.partition(),
                    offset = message.offset(),
                    error = %err,
                    "Skipping undecodable order"
                );
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                commit(&consumer, &message);
                continue;
            }
        };

        tracing::trace!(
            partition = message.partition(),
            offset = message.offset(),
            order_id = %order.id,
            "Received order"
        );

        let order_id = order.id;
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(Ok(OrderDelivery::with_ack(order, ack_tx))).await.is_err() {
            tracing::debug!("Subscriber dropped, exiting consumer task");
            break;
        }

        // Offset only moves once the order reached a terminal outcome.
        if ack_rx.await.is_ok() {
            commit(&consumer, &message);
            continue;
        }

        if tx.is_closed() {
            tracing::debug!(
                offset = message.offset(),
                "Subscriber dropped before ack, leaving offset uncommitted"
            );
            break;
        }

        // Rewind so the unacknowledged order is delivered again before anything after it.
        tracing::warn!(
            partition = message.partition(),
            offset = message.offset(),
            order_id = %order_id,
            "Delivery dropped without ack, rewinding"
        );
        if let Err(e) = consumer.seek(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset()),
            SEEK_TIMEOUT,
        ) {
            tracing::error!(
                partition = message.partition(),
                offset = message.offset(),
                error = %e,
                "Failed to rewind, closing stream so the group redelivers"
            );
            break;
        }
    }

    tracing::debug!("Consumer task exiting");
}

impl OrderLog for RedpandaOrderLog {
    fn publish<'a>(
        &'a self,
        order: &'a VoucherOrder,
    ) -> Pin<Box<dyn Future<Output = Result<(), OrderLogError>> + Send + 'a>> {
        Box::pin(async move {
            let payload = encode_order(order)?;
            let key = order.user_id.get().to_string();
            let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        order_id = %order.id,
                        "Order published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        order_id = %order.id,
                        error = %kafka_error,
                        "Failed to publish order"
                    );
                    Err(OrderLogError::PublishFailed {
                        order_id: order.id.get(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<OrderStream, OrderLogError>> + Send + '_>> {
        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &self.consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| {
                    OrderLogError::SubscriptionFailed(format!("Failed to create consumer: {e}"))
                })?;

            consumer.subscribe(&[self.topic.as_str()]).map_err(|e| {
                OrderLogError::SubscriptionFailed(format!(
                    "Failed to subscribe to {}: {e}",
                    self.topic
                ))
            })?;

            tracing::info!(
                topic = %self.topic,
                consumer_group = %self.consumer_group,
                buffer_size = self.buffer_size,
                auto_offset_reset = %self.auto_offset_reset,
                "Subscribed to order log"
            );

            let (tx, rx) = mpsc::channel(self.buffer_size);
            tokio::spawn(forward_orders(consumer, tx));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as OrderStream)
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use flashsale_core::{OrderId, UserId, VoucherId};

    fn order() -> VoucherOrder {
        VoucherOrder::new(
            OrderId(7),
            UserId(42),
            VoucherId(3),
            flashsale_core::Utc::now(),
        )
    }

    #[test]
    fn redpanda_order_log_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaOrderLog>();
        assert_sync::<RedpandaOrderLog>();
    }

    #[test]
    fn payload_decodes_to_the_same_order() {
        let order = order();
        let payload = encode_order(&order).unwrap();
        assert_eq!(decode_order(Some(&payload)).unwrap(), order);
    }

    #[test]
    fn missing_or_corrupt_payload_is_a_deserialization_error() {
        assert!(matches!(
            decode_order(None),
            Err(OrderLogError::DeserializationFailed(_))
        ));
        assert!(matches!(
            decode_order(Some(&[0xff, 0x01])),
            Err(OrderLogError::DeserializationFailed(_))
        ));
    }

    #[test]
    fn builder_requires_brokers() {
        assert!(matches!(
            RedpandaOrderLog::builder().build(),
            Err(OrderLogError::ConnectionFailed(_))
        ));
        assert!(matches!(
            RedpandaOrderLog::builder().brokers("  ").build(),
            Err(OrderLogError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn builder_applies_defaults() {
        // Creating a producer does not contact the broker.
        let log = RedpandaOrderLog::new("localhost:9092").unwrap();
        assert_eq!(log.brokers(), "localhost:9092");
        assert_eq!(log.topic(), DEFAULT_TOPIC);
        assert_eq!(log.consumer_group(), DEFAULT_CONSUMER_GROUP);

        let log = RedpandaOrderLog::builder()
            .brokers("localhost:9092")
            .topic("orders-test")
            .consumer_group("workers")
            .buffer_size(0)
            .build()
            .unwrap();
        assert_eq!(log.topic(), "orders-test");
        assert_eq!(log.consumer_group(), "workers");
        assert_eq!(log.buffer_size, 1);
    }
}
