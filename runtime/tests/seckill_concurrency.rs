//! End-to-end admission and commit under concurrency, on the in-memory stores.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use flashsale_core::order_log::OrderLog;
use flashsale_core::{AdmissionOutcome, RequestContext, SeckillVoucher, UserId, VoucherId};
use flashsale_runtime::config::SeckillConfig;
use flashsale_runtime::{BoundedOrderQueue, OrderCommitWorker, VoucherOrderService};
use flashsale_testing::{FixedClock, InMemoryCoordinationStore, InMemoryVoucherStore, test_time};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// Fixtures
// ============================================================================

const VOUCHER: VoucherId = VoucherId(1);

type Service = VoucherOrderService<InMemoryCoordinationStore, InMemoryVoucherStore>;

struct Pipeline {
    store: Arc<InMemoryCoordinationStore>,
    vouchers: Arc<InMemoryVoucherStore>,
    queue: Arc<BoundedOrderQueue>,
    service: Arc<Service>,
}

async fn pipeline(stock: i32) -> Pipeline {
    let store = Arc::new(InMemoryCoordinationStore::new());
    let vouchers = Arc::new(InMemoryVoucherStore::new());
    let queue = Arc::new(BoundedOrderQueue::new(4096));
    let clock = Arc::new(FixedClock::new(test_time() + chrono::Duration::minutes(1)));

    let service = Arc::new(VoucherOrderService::new(
        Arc::clone(&store),
        Arc::clone(&vouchers),
        Arc::clone(&queue) as Arc<dyn OrderLog>,
        clock,
        Duration::from_secs(60),
    ));
    service
        .add_seckill_voucher(&SeckillVoucher {
            voucher_id: VOUCHER,
            stock,
            begin_time: test_time(),
            end_time: test_time() + chrono::Duration::hours(1),
        })
        .await
        .unwrap();

    Pipeline {
        store,
        vouchers,
        queue,
        service,
    }
}

async fn fire(service: &Arc<Service>, users: impl IntoIterator<Item = i64>) -> Vec<(i64, AdmissionOutcome)> {
    let handles: Vec<_> = users
        .into_iter()
        .map(|user| {
            let service = Arc::clone(service);
            tokio::spawn(async move {
                let outcome = service
                    .seckill_voucher(&RequestContext::new(UserId(user)), VOUCHER)
                    .await
                    .unwrap();
                (user, outcome)
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    outcomes
}

fn admitted(outcomes: &[(i64, AdmissionOutcome)]) -> Vec<i64> {
    outcomes
        .iter()
        .filter(|(_, o)| matches!(o, AdmissionOutcome::Admitted { .. }))
        .map(|(u, _)| *u)
        .collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_unit_goes_to_exactly_one_of_two_users() {
    let p = pipeline(1).await;
    let outcomes = fire(&p.service, [1, 2]).await;

    assert_eq!(admitted(&outcomes).len(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|(_, o)| *o == AdmissionOutcome::OutOfStock)
            .count(),
        1
    );
    assert_eq!(p.store.peek("seckill:stock:1").as_deref(), Some("0"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundreds_of_buyers_never_oversell() {
    let p = pipeline(25).await;
    let outcomes = fire(&p.service, 1..=300).await;

    let winners = admitted(&outcomes);
    assert_eq!(winners.len(), 25);
    assert_eq!(p.store.set_len("seckill:order:1"), 25);
    assert_eq!(p.store.peek("seckill:stock:1").as_deref(), Some("0"));
    assert_eq!(p.queue.len(), 25);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retries_by_one_user_admit_once() {
    let p = pipeline(10).await;
    let outcomes = fire(&p.service, std::iter::repeat(42).take(20)).await;

    assert_eq!(admitted(&outcomes).len(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|(_, o)| *o == AdmissionOutcome::Duplicate)
            .count(),
        19
    );
    assert_eq!(p.store.peek("seckill:stock:1").as_deref(), Some("9"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn admitted_orders_are_committed_once_each() {
    let p = pipeline(20).await;
    let worker = Arc::new(OrderCommitWorker::new(
        Arc::clone(&p.store),
        Arc::clone(&p.vouchers),
        &SeckillConfig::default(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = worker
        .spawn(Arc::clone(&p.queue) as Arc<dyn OrderLog>, shutdown_rx)
        .await
        .unwrap();

    let outcomes = fire(&p.service, 1..=60).await;
    let winners: HashSet<i64> = admitted(&outcomes).into_iter().collect();
    assert_eq!(winners.len(), 20);

    tokio::time::timeout(Duration::from_secs(5), async {
        while p.vouchers.orders().len() < 20 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker did not commit every admitted order");

    let committed: HashSet<i64> = p.vouchers.orders().iter().map(|o| o.user_id.get()).collect();
    assert_eq!(committed, winners);
    assert_eq!(p.vouchers.stock(VOUCHER), Some(0));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any request sequence admits at most `stock` distinct users and leaves
    /// the counter equal to `stock - admitted`.
    #[test]
    fn admission_respects_stock_and_uniqueness(
        stock in 0i32..20,
        users in prop::collection::vec(1i64..30, 0..80),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let p = pipeline(stock).await;
            let mut winners = Vec::new();
            for user in &users {
                let outcome = p
                    .service
                    .seckill_voucher(&RequestContext::new(UserId(*user)), VOUCHER)
                    .await
                    .unwrap();
                if outcome.order_id().is_some() {
                    winners.push(*user);
                }
            }

            let distinct: HashSet<i64> = winners.iter().copied().collect();
            prop_assert_eq!(distinct.len(), winners.len());
            prop_assert!(winners.len() <= usize::try_from(stock).unwrap());

            let remaining: i64 = p.store.peek("seckill:stock:1").unwrap().parse().unwrap();
            prop_assert!(remaining >= 0);
            prop_assert_eq!(remaining, i64::from(stock) - i64::try_from(winners.len()).unwrap());
            Ok::<(), TestCaseError>(())
        })?;
    }
}
