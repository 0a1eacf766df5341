//! Shop read and write paths on top of [`CacheClient`].

use crate::cache::{CacheClient, CacheStrategy};
use flashsale_core::coordination::CoordinationStore;
use flashsale_core::keys::{CACHE_SHOP_KEY, shop_cache_key};
use flashsale_core::repository::ShopRepository;
use flashsale_core::{FlashSaleError, Result, Shop, ShopId};
use std::sync::Arc;
use std::time::Duration;

/// Shop service.
pub struct ShopService<S, R> {
    cache: Arc<CacheClient<S>>,
    repo: Arc<R>,
}

impl<S, R> ShopService<S, R>
where
    S: CoordinationStore,
    R: ShopRepository,
{
    /// Service reading through `cache` and writing to `repo`.
    #[must_use]
    pub const fn new(cache: Arc<CacheClient<S>>, repo: Arc<R>) -> Self {
        Self { cache, repo }
    }

    /// Look a shop up through the chosen cache strategy.
    ///
    /// Under [`CacheStrategy::LogicalExpire`] a shop that was never warmed
    /// reads as `None`.
    ///
    /// # Errors
    ///
    /// Returns error if the cache or the repository fails.
    pub async fn query_by_id(&self, id: ShopId, strategy: CacheStrategy) -> Result<Option<Shop>> {
        let repo = Arc::clone(&self.repo);
        self.cache
            .query(strategy, CACHE_SHOP_KEY, id, move |id| {
                let repo = Arc::clone(&repo);
                async move { repo.find_shop(id).await }
            })
            .await
    }

    /// Update a shop: backing store first, then drop the cached copy.
    ///
    /// Returns `false` if no shop row has this id; the cache is left untouched.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::InvalidArgument`] for a non-positive id
    /// - repository or store failures
    pub async fn update(&self, shop: &Shop) -> Result<bool> {
        if shop.id.get() <= 0 {
            return Err(FlashSaleError::InvalidArgument(format!(
                "shop id must be positive, got {}",
                shop.id
            )));
        }

        if !self.repo.update_shop(shop).await? {
            tracing::info!(shop_id = %shop.id, "Shop update matched no row");
            return Ok(false);
        }

        self.cache.invalidate(&shop_cache_key(shop.id)).await?;
        Ok(true)
    }

    /// Load a shop and store it with a logical expiry `ttl` from now.
    ///
    /// Returns `false` if the shop does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the repository or the store fails.
    pub async fn warm_up(&self, id: ShopId, ttl: Duration) -> Result<bool> {
        let Some(shop) = self.repo.find_shop(id).await? else {
            return Ok(false);
        };
        self.cache
            .set_with_logical_expire(&shop_cache_key(id), &shop, ttl)
            .await?;
        tracing::info!(shop_id = %id, ttl_secs = ttl.as_secs(), "Shop warmed");
        Ok(true)
    }
}
