//! # Flashsale Runtime
//!
//! The working half of the flash-sale pipeline, written against the traits in
//! `flashsale-core` so it runs equally on Redis/PostgreSQL and on the
//! in-memory stores of `flashsale-testing`.
//!
//! ## Core Components
//!
//! - **Distributed lock** ([`lock`]): lease-based, fenced release
//! - **ID worker** ([`id_worker`]): `timestamp << 32 | per-day sequence`
//! - **Cache-aside** ([`cache`]): pass-through, mutex rebuild, logical expiration
//! - **Admission** ([`admission`]): the atomic stock/duplicate script
//! - **Order queue** ([`queue`]): bounded in-process [`OrderLog`](flashsale_core::order_log::OrderLog)
//! - **Voucher orders** ([`voucher_order`]): the request path
//! - **Commit worker** ([`worker`]): the single consumer
//! - **Shops** ([`shop`]): cached read path, invalidate-on-write
//!
//! ## Example
//!
//! ```ignore
//! let store = Arc::new(RedisCoordinationStore::new(&config.redis.url).await?);
//! let log: Arc<dyn OrderLog> = Arc::new(BoundedOrderQueue::new(config.seckill.queue_capacity));
//!
//! let service = VoucherOrderService::new(store.clone(), vouchers.clone(), log.clone(), clock, grace);
//! let worker = Arc::new(OrderCommitWorker::new(store, vouchers, &config.seckill));
//! let handle = worker.spawn(log, shutdown_rx).await?;
//!
//! let outcome = service.seckill_voucher(&RequestContext::new(user), voucher).await?;
//! ```

/// Atomic admission script invocation
pub mod admission;

/// Cache-aside read strategies
pub mod cache;

/// Environment-driven configuration
pub mod config;

/// Time-ordered ID generation
pub mod id_worker;

/// Lease-based distributed lock
pub mod lock;

/// Prometheus metrics for observability
pub mod metrics;

/// Bounded in-process order queue
pub mod queue;

/// Retry logic with exponential backoff
pub mod retry;

/// Shop service
pub mod shop;

/// Seckill request path
pub mod voucher_order;

/// Order commit worker
pub mod worker;

pub use admission::{Reservation, SeckillAdmission};
pub use cache::{CacheClient, CacheStrategy, ExpiringEntry, RebuildExecutor};
pub use config::Config;
pub use id_worker::IdWorker;
pub use lock::DistributedLock;
pub use queue::BoundedOrderQueue;
pub use retry::RetryPolicy;
pub use shop::ShopService;
pub use voucher_order::VoucherOrderService;
pub use worker::OrderCommitWorker;
