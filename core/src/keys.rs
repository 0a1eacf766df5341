//! Coordination-store key namespace and TTL constants.
//!
//! All keys are namespaced so the pipeline can share a Redis instance with
//! other services.

use crate::types::{ShopId, UserId, VoucherId};
use std::time::Duration;

/// Cached shop entity: `cache:shop:{id}`.
pub const CACHE_SHOP_KEY: &str = "cache:shop:";

/// Physical TTL of a cached shop (pass-through and mutex strategies).
pub const CACHE_SHOP_TTL: Duration = Duration::from_secs(30 * 60);

/// Physical TTL of the empty-value tombstone written for missing entities.
pub const CACHE_NULL_TTL: Duration = Duration::from_secs(2 * 60);

/// Logical TTL used when warming hot shop keys.
pub const CACHE_SHOP_LOGICAL_TTL: Duration = Duration::from_secs(20);

/// Prefix applied to every lock resource.
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Lease of a cache-rebuild mutex.
pub const LOCK_SHOP_TTL: Duration = Duration::from_secs(10);

/// Stock counter of a campaign: `seckill:stock:{voucherId}`.
pub const SECKILL_STOCK_KEY: &str = "seckill:stock:";

/// Set of admitted users of a campaign: `seckill:order:{voucherId}`.
pub const SECKILL_ORDER_KEY: &str = "seckill:order:";

/// Campaign window hash (`begin`, `end`): `seckill:voucher:{voucherId}`.
pub const SECKILL_VOUCHER_KEY: &str = "seckill:voucher:";

/// Prefix of per-day ID counters: `icr:{prefix}:{yyyy:MM:dd}`.
pub const ID_COUNTER_KEY: &str = "icr:";

/// ID prefix for voucher orders.
pub const ORDER_ID_PREFIX: &str = "order";

/// Cache key of a shop.
#[must_use]
pub fn shop_cache_key(id: ShopId) -> String {
    format!("{CACHE_SHOP_KEY}{id}")
}

/// Stock counter key of a campaign.
#[must_use]
pub fn stock_key(voucher_id: VoucherId) -> String {
    format!("{SECKILL_STOCK_KEY}{voucher_id}")
}

/// Admitted-user set key of a campaign.
#[must_use]
pub fn order_set_key(voucher_id: VoucherId) -> String {
    format!("{SECKILL_ORDER_KEY}{voucher_id}")
}

/// Window hash key of a campaign.
#[must_use]
pub fn voucher_window_key(voucher_id: VoucherId) -> String {
    format!("{SECKILL_VOUCHER_KEY}{voucher_id}")
}

/// Lock resource serializing one user's order commits.
#[must_use]
pub fn order_lock_resource(user_id: UserId) -> String {
    format!("order:{user_id}")
}

/// Lock resource guarding the rebuild of one cache key.
#[must_use]
pub fn rebuild_lock_resource(cache_key: &str) -> String {
    format!("rebuild:{cache_key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(shop_cache_key(ShopId(1)), "cache:shop:1");
        assert_eq!(stock_key(VoucherId(9)), "seckill:stock:9");
        assert_eq!(order_set_key(VoucherId(9)), "seckill:order:9");
        assert_eq!(voucher_window_key(VoucherId(9)), "seckill:voucher:9");
        assert_eq!(order_lock_resource(UserId(5)), "order:5");
        assert_eq!(rebuild_lock_resource("cache:shop:1"), "rebuild:cache:shop:1");
    }
}
