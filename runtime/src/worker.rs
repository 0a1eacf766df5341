//! Order commit worker.
//!
//! One consumer drains the [`OrderLog`] and commits orders strictly one at a
//! time. Each commit runs under a per-user [`DistributedLock`] and delegates the
//! re-check, conditional stock decrement and insert to a single repository
//! transaction.
//!
//! An order that fails for good is logged and acknowledged; it never stops
//! the loop. While the backing store is unreachable the current order is held
//! and retried, so an acknowledged order is always one that reached an outcome.

use crate::config::SeckillConfig;
use crate::lock::DistributedLock;
use crate::metrics::CommitMetrics;
use crate::retry::{RetryPolicy, retry_transient};
use flashsale_core::coordination::CoordinationStore;
use flashsale_core::keys::order_lock_resource;
use flashsale_core::order_log::{OrderLog, OrderStream};
use flashsale_core::repository::VoucherOrderRepository;
use flashsale_core::{CommitOutcome, ErrorKind, FlashSaleError, Result, VoucherOrder};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Single consumer committing admitted orders to the backing store.
pub struct OrderCommitWorker<S, R> {
    store: Arc<S>,
    orders: Arc<R>,
    lock_lease: Duration,
    retry: RetryPolicy,
}

impl<S, R> OrderCommitWorker<S, R>
where
    S: CoordinationStore,
    R: VoucherOrderRepository,
{
    /// Worker using the lock lease and retry budget from `config`.
    #[must_use]
    pub fn new(store: Arc<S>, orders: Arc<R>, config: &SeckillConfig) -> Self {
        Self {
            store,
            orders,
            lock_lease: config.order_lock_lease,
            retry: RetryPolicy::builder()
                .max_retries(config.commit_max_retries)
                .initial_delay(Duration::from_millis(50))
                .max_delay(Duration::from_secs(2))
                .build(),
        }
    }

    /// Replace the retry policy for transient repository failures.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Commit one order.
    ///
    /// Safe to call again for an order that was already committed: the
    /// repository reports [`CommitOutcome::DuplicateOrder`] and nothing changes.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::LockContended`] if another commit for the same user
    ///   holds the lock
    /// - [`FlashSaleError::Database`] once transient retries are exhausted
    pub async fn handle_order(&self, order: &VoucherOrder) -> Result<CommitOutcome> {
        let started = Instant::now();
        let resource = order_lock_resource(order.user_id);
        let lock = DistributedLock::new(Arc::clone(&self.store), &resource);

        if !lock.try_lock(self.lock_lease).await {
            CommitMetrics::record("lock_contended", started.elapsed());
            return Err(FlashSaleError::LockContended { resource });
        }

        let result =
            retry_transient(&self.retry, || self.orders.create_voucher_order(order)).await;
        lock.unlock().await;

        match &result {
            Ok(CommitOutcome::Committed) => {
                tracing::info!(
                    order_id = %order.id,
                    user_id = %order.user_id,
                    voucher_id = %order.voucher_id,
                    "Order committed"
                );
            }
            Ok(outcome) => {
                tracing::error!(
                    order_id = %order.id,
                    user_id = %order.user_id,
                    voucher_id = %order.voucher_id,
                    outcome = outcome.as_str(),
                    "Admitted order rejected at commit"
                );
            }
            Err(_) => {}
        }

        let label = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "error",
        };
        CommitMetrics::record(label, started.elapsed());
        result
    }

    /// Drain `stream` until it ends or `shutdown` turns `true`.
    ///
    /// A delivery is acknowledged once it reached a terminal outcome:
    /// committed, rejected by the repository, or dropped for a non-retryable
    /// error such as lock contention. Retryable infrastructure failures are retried
    /// with backoff until the commit goes through; if shutdown arrives first
    /// the delivery is released unacknowledged so a durable log redelivers it.
    pub async fn run(&self, mut stream: OrderStream, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Order commit worker started");

        while !*shutdown.borrow() {
            let next = tokio::select! {
                next = stream.next() => next,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                    continue;
                }
            };

            let Some(next) = next else {
                tracing::info!("Order log closed");
                break;
            };

            let delivery = match next {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::error!(error = %e, "Error receiving order from log");
                    continue;
                }
            };

            match self.commit_until_terminal(delivery.order(), &mut shutdown).await {
                Some(result) => {
                    if let Err(e) = result {
                        log_dropped(delivery.order(), &e);
                    }
                    delivery.ack();
                }
                None => {
                    tracing::warn!(
                        order_id = %delivery.order().id,
                        "Shutdown before commit, order left unacknowledged"
                    );
                    break;
                }
            }
        }

        tracing::info!("Order commit worker stopped");
    }

    /// Call [`handle_order`](Self::handle_order) until it returns something
    /// other than a retryable infrastructure error. `None` means shutdown won.
    async fn commit_until_terminal(
        &self,
        order: &VoucherOrder,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Result<CommitOutcome>> {
        let mut attempt = 0;
        loop {
            let result = self.handle_order(order).await;
            match &result {
                Err(e) if e.is_retryable() => {}
                _ => return Some(result),
            }

            let delay = self.retry.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            if let Err(e) = &result {
                tracing::warn!(
                    order_id = %order.id,
                    error = %e,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Backing store unavailable, holding order"
                );
            }

            if *shutdown.borrow() {
                return None;
            }
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                }
            }
        }
    }

    /// Subscribe to `log` and run the worker on a background task.
    ///
    /// # Errors
    ///
    /// Returns error if the subscription cannot be opened.
    pub async fn spawn(
        self: Arc<Self>,
        log: Arc<dyn OrderLog>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>> {
        let stream = log.subscribe().await?;
        Ok(tokio::spawn(async move {
            self.run(stream, shutdown).await;
        }))
    }
}

fn log_dropped(order: &VoucherOrder, e: &FlashSaleError) {
    if e.kind() == ErrorKind::Contention {
        tracing::warn!(
            order_id = %order.id,
            user_id = %order.user_id,
            error = %e,
            "Order dropped under contention"
        );
    } else {
        tracing::error!(
            order_id = %order.id,
            user_id = %order.user_id,
            error = %e,
            kind = ?e.kind(),
            "Order dropped"
        );
    }
}
