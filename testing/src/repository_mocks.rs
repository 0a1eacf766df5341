//! In-memory backing-store repositories.
//!
//! - [`InMemoryShopRepository`]: shop rows with a load counter and injected latency
//! - [`InMemoryVoucherStore`]: seckill vouchers and voucher orders sharing one
//!   mutex, so the commit unit is transactional

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use flashsale_core::repository::{ShopRepository, VoucherOrderRepository, VoucherRepository};
use flashsale_core::{
    CommitOutcome, FlashSaleError, Result, SeckillVoucher, Shop, ShopId, UserId, VoucherId,
    VoucherOrder,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory shop table.
///
/// `find_shop` sleeps for the configured latency before answering, which
/// widens the window in which concurrent cache misses overlap.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShopRepository {
    shops: Arc<Mutex<HashMap<ShopId, Shop>>>,
    latency: Duration,
    loads: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryShopRepository {
    /// Create an empty repository with no latency
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `find_shop` by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Insert or replace a row
    pub fn insert(&self, shop: Shop) {
        self.shops.lock().unwrap().insert(shop.id, shop);
    }

    /// Delete a row
    pub fn remove(&self, id: ShopId) {
        self.shops.lock().unwrap().remove(&id);
    }

    /// Current row, bypassing counters
    #[must_use]
    pub fn row(&self, id: ShopId) -> Option<Shop> {
        self.shops.lock().unwrap().get(&id).cloned()
    }

    /// Number of `find_shop` calls so far
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Toggle simulated outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FlashSaleError::Database("connection refused".to_string()));
        }
        Ok(())
    }
}

impl ShopRepository for InMemoryShopRepository {
    async fn find_shop(&self, id: ShopId) -> Result<Option<Shop>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check_available()?;
        Ok(self.row(id))
    }

    async fn update_shop(&self, shop: &Shop) -> Result<bool> {
        self.check_available()?;
        let mut shops = self.shops.lock().unwrap();
        match shops.get_mut(&shop.id) {
            Some(row) => {
                *row = shop.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug, Default)]
struct VoucherTables {
    vouchers: HashMap<VoucherId, SeckillVoucher>,
    orders: Vec<VoucherOrder>,
}

/// In-memory `tb_seckill_voucher` + `tb_voucher_order`.
///
/// Implements both [`VoucherRepository`] and [`VoucherOrderRepository`];
/// the commit unit holds the table mutex for its whole duration.
///
/// # Failure injection
///
/// [`fail_next_commits`](Self::fail_next_commits) makes the next `n`
/// `create_voucher_order` calls fail with a transient
/// [`FlashSaleError::Database`] before touching any row.
///
/// # Example
///
/// ```
/// use flashsale_testing::{InMemoryVoucherStore, test_time};
/// use flashsale_core::repository::VoucherOrderRepository;
/// use flashsale_core::{CommitOutcome, OrderId, SeckillVoucher, UserId, VoucherId, VoucherOrder};
///
/// # async fn example() -> flashsale_core::Result<()> {
/// let store = InMemoryVoucherStore::new();
/// store.insert_voucher(SeckillVoucher {
///     voucher_id: VoucherId(1),
///     stock: 1,
///     begin_time: test_time(),
///     end_time: test_time(),
/// });
///
/// let order = VoucherOrder::new(OrderId(1), UserId(7), VoucherId(1), test_time());
/// assert_eq!(store.create_voucher_order(&order).await?, CommitOutcome::Committed);
/// assert_eq!(store.create_voucher_order(&order).await?, CommitOutcome::DuplicateOrder);
/// assert_eq!(store.stock(VoucherId(1)), Some(0));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryVoucherStore {
    tables: Arc<Mutex<VoucherTables>>,
    voucher_loads: Arc<AtomicUsize>,
    commit_calls: Arc<AtomicUsize>,
    pending_failures: Arc<AtomicUsize>,
}

impl InMemoryVoucherStore {
    /// Create empty tables
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a voucher row
    pub fn insert_voucher(&self, voucher: SeckillVoucher) {
        self.tables
            .lock()
            .unwrap()
            .vouchers
            .insert(voucher.voucher_id, voucher);
    }

    /// Current stock column of a voucher
    #[must_use]
    pub fn stock(&self, voucher_id: VoucherId) -> Option<i32> {
        self.tables
            .lock()
            .unwrap()
            .vouchers
            .get(&voucher_id)
            .map(|v| v.stock)
    }

    /// All committed orders in insertion order
    #[must_use]
    pub fn orders(&self) -> Vec<VoucherOrder> {
        self.tables.lock().unwrap().orders.clone()
    }

    /// Number of `find_seckill_voucher` calls so far
    #[must_use]
    pub fn voucher_loads(&self) -> usize {
        self.voucher_loads.load(Ordering::SeqCst)
    }

    /// Number of `create_voucher_order` calls so far (including failed ones)
    #[must_use]
    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` commit attempts with a transient database error
    pub fn fail_next_commits(&self, n: usize) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl VoucherRepository for InMemoryVoucherStore {
    async fn find_seckill_voucher(&self, id: VoucherId) -> Result<Option<SeckillVoucher>> {
        self.voucher_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.lock().unwrap().vouchers.get(&id).cloned())
    }

    async fn save_seckill_voucher(&self, voucher: &SeckillVoucher) -> Result<()> {
        self.insert_voucher(voucher.clone());
        Ok(())
    }
}

impl VoucherOrderRepository for InMemoryVoucherStore {
    async fn create_voucher_order(&self, order: &VoucherOrder) -> Result<CommitOutcome> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_failure() {
            return Err(FlashSaleError::Database(
                "connection reset by peer".to_string(),
            ));
        }

        let mut tables = self.tables.lock().unwrap();
        let tables = &mut *tables;

        let exists = tables
            .orders
            .iter()
            .any(|o| o.user_id == order.user_id && o.voucher_id == order.voucher_id);
        if exists {
            return Ok(CommitOutcome::DuplicateOrder);
        }

        match tables.vouchers.get_mut(&order.voucher_id) {
            Some(voucher) if voucher.stock > 0 => voucher.stock -= 1,
            _ => return Ok(CommitOutcome::OutOfStock),
        }

        tables.orders.push(order.clone());
        Ok(CommitOutcome::Committed)
    }

    async fn count_orders(&self, user_id: UserId, voucher_id: VoucherId) -> Result<i64> {
        let tables = self.tables.lock().unwrap();
        let count = tables
            .orders
            .iter()
            .filter(|o| o.user_id == user_id && o.voucher_id == voucher_id)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_time;
    use flashsale_core::OrderId;

    fn shop(id: i64) -> Shop {
        Shop {
            id: ShopId(id),
            name: format!("shop-{id}"),
            area: "Downtown".into(),
            address: "1 Main St".into(),
            score: 45,
        }
    }

    fn voucher(stock: i32) -> SeckillVoucher {
        SeckillVoucher {
            voucher_id: VoucherId(1),
            stock,
            begin_time: test_time(),
            end_time: test_time() + chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn shop_lookups_are_counted() {
        let repo = InMemoryShopRepository::new();
        repo.insert(shop(1));

        assert!(repo.find_shop(ShopId(1)).await.unwrap().is_some());
        assert!(repo.find_shop(ShopId(2)).await.unwrap().is_none());
        assert_eq!(repo.load_count(), 2);
    }

    #[tokio::test]
    async fn update_missing_shop_reports_false() {
        let repo = InMemoryShopRepository::new();
        assert!(!repo.update_shop(&shop(3)).await.unwrap());
    }

    #[tokio::test]
    async fn commit_stops_at_zero_stock() {
        let store = InMemoryVoucherStore::new();
        store.insert_voucher(voucher(1));

        let first = VoucherOrder::new(OrderId(1), UserId(1), VoucherId(1), test_time());
        let second = VoucherOrder::new(OrderId(2), UserId(2), VoucherId(1), test_time());

        assert_eq!(
            store.create_voucher_order(&first).await.unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(
            store.create_voucher_order(&second).await.unwrap(),
            CommitOutcome::OutOfStock
        );
        assert_eq!(store.stock(VoucherId(1)), Some(0));
        assert_eq!(store.orders().len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_leave_no_side_effect() {
        let store = InMemoryVoucherStore::new();
        store.insert_voucher(voucher(5));
        store.fail_next_commits(2);

        let order = VoucherOrder::new(OrderId(1), UserId(1), VoucherId(1), test_time());
        assert!(store.create_voucher_order(&order).await.is_err());
        assert!(store.create_voucher_order(&order).await.is_err());
        assert_eq!(store.stock(VoucherId(1)), Some(5));

        assert_eq!(
            store.create_voucher_order(&order).await.unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(store.commit_calls(), 3);
        assert_eq!(store.count_orders(UserId(1), VoucherId(1)).await.unwrap(), 1);
    }
}
