//! Relational backing store.
//!
//! The backing store is the durable source of truth and is orders of
//! magnitude slower than the coordination store. The admission path never
//! touches it; only cache rebuilds, voucher publishing and the commit worker do.

use crate::error::Result;
use crate::types::{CommitOutcome, SeckillVoucher, Shop, ShopId, UserId, VoucherId, VoucherOrder};
use std::future::Future;

/// Shop persistence.
pub trait ShopRepository: Send + Sync + 'static {
    /// Point lookup by primary key.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`](crate::FlashSaleError::Database) on failure.
    fn find_shop(&self, id: ShopId) -> impl Future<Output = Result<Option<Shop>>> + Send;

    /// Update a shop row. Returns `false` if no row matched.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`](crate::FlashSaleError::Database) on failure.
    fn update_shop(&self, shop: &Shop) -> impl Future<Output = Result<bool>> + Send;
}

/// Seckill voucher persistence.
pub trait VoucherRepository: Send + Sync + 'static {
    /// Point lookup by voucher id.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`](crate::FlashSaleError::Database) on failure.
    fn find_seckill_voucher(
        &self,
        id: VoucherId,
    ) -> impl Future<Output = Result<Option<SeckillVoucher>>> + Send;

    /// Insert or replace a seckill voucher.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`](crate::FlashSaleError::Database) on failure.
    fn save_seckill_voucher(
        &self,
        voucher: &SeckillVoucher,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Voucher order persistence.
pub trait VoucherOrderRepository: Send + Sync + 'static {
    /// Commit one admitted order as a single transaction:
    ///
    /// 1. if an order for `(user_id, voucher_id)` exists → [`CommitOutcome::DuplicateOrder`]
    /// 2. decrement stock only where `stock > 0`, else → [`CommitOutcome::OutOfStock`]
    /// 3. insert the order row → [`CommitOutcome::Committed`]
    ///
    /// Any non-committed outcome leaves no side effect. A uniqueness violation
    /// raised by the insert is reported as [`CommitOutcome::DuplicateOrder`].
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`](crate::FlashSaleError::Database) if the
    /// transaction cannot be executed; in that case nothing was committed.
    fn create_voucher_order(
        &self,
        order: &VoucherOrder,
    ) -> impl Future<Output = Result<CommitOutcome>> + Send;

    /// Number of committed orders for `(user_id, voucher_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`](crate::FlashSaleError::Database) on failure.
    fn count_orders(
        &self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> impl Future<Output = Result<i64>> + Send;
}
