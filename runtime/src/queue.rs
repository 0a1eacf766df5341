//! Bounded in-process order queue.
//!
//! The default [`OrderLog`] when no durable log is configured. Publishing never
//! blocks: a full queue rejects the order immediately so the request path can
//! roll back its reservation. Orders still queued when the process exits are
//! lost.

use flashsale_core::VoucherOrder;
use flashsale_core::order_log::{OrderDelivery, OrderLog, OrderLogError, OrderStream};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{Mutex, mpsc};

/// Default capacity, matching a one-million-slot blocking queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024 * 1024;

/// Single-consumer bounded queue of admitted orders.
pub struct BoundedOrderQueue {
    sender: mpsc::Sender<VoucherOrder>,
    receiver: Mutex<Option<mpsc::Receiver<VoucherOrder>>>,
    capacity: usize,
}

impl BoundedOrderQueue {
    /// Create a queue holding at most `capacity` orders.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            capacity,
        }
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Orders currently waiting for the consumer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// `true` if no order is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BoundedOrderQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl OrderLog for BoundedOrderQueue {
    fn publish<'a>(
        &'a self,
        order: &'a VoucherOrder,
    ) -> Pin<Box<dyn Future<Output = Result<(), OrderLogError>> + Send + 'a>> {
        Box::pin(async move {
            match self.sender.try_send(order.clone()) {
                Ok(()) => {
                    tracing::trace!(order_id = %order.id, "Order queued");
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(order_id = %order.id, capacity = self.capacity, "Order queue full");
                    Err(OrderLogError::QueueFull {
                        capacity: self.capacity,
                    })
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(OrderLogError::PublishFailed {
                    order_id: order.id.get(),
                    reason: "consumer stopped".to_string(),
                }),
            }
        })
    }

    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<OrderStream, OrderLogError>> + Send + '_>> {
        Box::pin(async move {
            let Some(mut rx) = self.receiver.lock().await.take() else {
                return Err(OrderLogError::SubscriptionFailed(
                    "order queue already has a consumer".to_string(),
                ));
            };

            let stream = async_stream::stream! {
                while let Some(order) = rx.recv().await {
                    yield Ok(OrderDelivery::new(order));
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
    use flashsale_testing::test_time;
    use futures::StreamExt;

    fn order(n: i64) -> VoucherOrder {
        VoucherOrder::new(OrderId(n), UserId(n), VoucherId(1), test_time())
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let queue = BoundedOrderQueue::new(8);
        for n in 1..=3 {
            queue.publish(&order(n)).await.unwrap();
        }
        assert_eq!(queue.len(), 3);

        let mut stream = queue.subscribe().await.unwrap();
        for n in 1..=3 {
            let delivery = stream.next().await.unwrap().unwrap();
            assert_eq!(delivery.order().id, OrderId(n));
            delivery.ack();
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking() {
        let queue = BoundedOrderQueue::new(2);
        queue.publish(&order(1)).await.unwrap();
        queue.publish(&order(2)).await.unwrap();

        let err = queue.publish(&order(3)).await.unwrap_err();
        assert_eq!(err, OrderLogError::QueueFull { capacity: 2 });
    }

    #[tokio::test]
    async fn only_one_consumer() {
        let queue = BoundedOrderQueue::new(2);
        let _first = queue.subscribe().await.unwrap();
        assert!(matches!(
            queue.subscribe().await,
            Err(OrderLogError::SubscriptionFailed(_))
        ));
    }

    #[tokio::test]
    async fn dropped_consumer_fails_publish() {
        let queue = BoundedOrderQueue::new(2);
        drop(queue.subscribe().await.unwrap());
        assert!(matches!(
            queue.publish(&order(1)).await,
            Err(OrderLogError::PublishFailed { order_id: 1, .. })
        ));
    }

    #[test]
    fn zero_capacity_is_raised() {
        assert_eq!(BoundedOrderQueue::new(0).capacity(), 1);
    }
}
