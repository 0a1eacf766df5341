//! Atomic flash-sale admission against the coordination store.
//!
//! Each campaign keeps three keys:
//!
//! - `seckill:stock:<voucherId>`: remaining stock counter
//! - `seckill:order:<voucherId>`: set of admitted user ids
//! - `seckill:voucher:<voucherId>`: hash with the `begin`/`end` window (RFC 3339)
//!
//! The stock counter and the admitted set are only ever mutated by the
//! server-side scripts, never by client-side read-modify-write.

use flashsale_core::coordination::{
    AtomicScript, CoordinationStore, SECKILL_ADMITTED, SECKILL_DUPLICATE, SECKILL_OUT_OF_STOCK,
};
use flashsale_core::keys::{order_set_key, stock_key, voucher_window_key};
use flashsale_core::{DateTime, FlashSaleError, OrderId, Result, SeckillVoucher, UserId, Utc, VoucherId};
use std::sync::Arc;
use std::time::Duration;

/// Result of the atomic admission script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// One unit of stock reserved for the user.
    Reserved,
    /// No stock left.
    OutOfStock,
    /// The user already holds a reservation.
    Duplicate,
}

/// Campaign window cached in the coordination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignWindowTimes {
    /// Sale opens
    pub begin: DateTime<Utc>,
    /// Sale closes
    pub end: DateTime<Utc>,
}

/// Admission gate for flash-sale campaigns.
pub struct SeckillAdmission<S> {
    store: Arc<S>,
    window_grace: Duration,
}

impl<S: CoordinationStore> SeckillAdmission<S> {
    /// Create a gate over `store`. Campaign keys are kept for `window_grace`
    /// after the window closes.
    #[must_use]
    pub const fn new(store: Arc<S>, window_grace: Duration) -> Self {
        Self {
            store,
            window_grace,
        }
    }

    /// Run the admission script for `(voucher_id, user_id)` in one round trip.
    ///
    /// Stock is checked before membership, so a sold-out campaign reports
    /// [`Reservation::OutOfStock`] even to a user who already holds a reservation.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::CoordinationStore`] if the script cannot run; callers
    ///   must treat this as a rejection
    /// - [`FlashSaleError::Integrity`] if the script returns an unknown code
    pub async fn check_and_reserve(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> Result<Reservation> {
        let stock = stock_key(voucher_id);
        let orders = order_set_key(voucher_id);
        let user = user_id.to_string();

        let code = self
            .store
            .eval(AtomicScript::Seckill, &[stock.as_str(), orders.as_str()], &[user.as_str()])
            .await?;

        match code {
            SECKILL_ADMITTED => Ok(Reservation::Reserved),
            SECKILL_OUT_OF_STOCK => Ok(Reservation::OutOfStock),
            SECKILL_DUPLICATE => Ok(Reservation::Duplicate),
            other => {
                tracing::error!(%voucher_id, %user_id, code = other, "Unknown admission script result");
                Err(FlashSaleError::Integrity {
                    order_id: OrderId(0),
                    reason: format!("admission script returned unknown code {other}"),
                })
            }
        }
    }

    /// Undo a reservation whose order could not be handed off.
    ///
    /// Returns `true` if a reservation was removed and its stock restored.
    /// Calling it again for the same user is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the script cannot run.
    pub async fn rollback(&self, voucher_id: VoucherId, user_id: UserId) -> Result<bool> {
        let stock = stock_key(voucher_id);
        let orders = order_set_key(voucher_id);
        let user = user_id.to_string();

        let undone = self
            .store
            .eval(AtomicScript::SeckillRollback, &[stock.as_str(), orders.as_str()], &[user.as_str()])
            .await?;
        Ok(undone == 1)
    }

    /// Publish a campaign's hot state: stock counter and window hash.
    ///
    /// Both keys expire `window_grace` after `end_time`. The admitted-user
    /// set is created on first admission.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::InvalidArgument`] for negative stock or an inverted window
    /// - store failures
    pub async fn preload(&self, voucher: &SeckillVoucher, now: DateTime<Utc>) -> Result<()> {
        if voucher.stock < 0 {
            return Err(FlashSaleError::InvalidArgument(format!(
                "stock of voucher {} is negative",
                voucher.voucher_id
            )));
        }
        if voucher.end_time < voucher.begin_time {
            return Err(FlashSaleError::InvalidArgument(format!(
                "voucher {} ends before it begins",
                voucher.voucher_id
            )));
        }

        let ttl = self.ttl_until_end(voucher.end_time, now);
        self.store
            .set(&stock_key(voucher.voucher_id), &voucher.stock.to_string(), ttl)
            .await?;
        self.cache_window(voucher, now).await?;

        tracing::info!(
            voucher_id = %voucher.voucher_id,
            stock = voucher.stock,
            begin = %voucher.begin_time,
            end = %voucher.end_time,
            "Seckill campaign preloaded"
        );
        Ok(())
    }

    /// Write only the window hash (used to re-warm it after a miss).
    ///
    /// # Errors
    ///
    /// Returns error if the store write fails.
    pub async fn cache_window(&self, voucher: &SeckillVoucher, now: DateTime<Utc>) -> Result<()> {
        let ttl = self.ttl_until_end(voucher.end_time, now);
        self.store
            .hash_set_all(
                &voucher_window_key(voucher.voucher_id),
                &[
                    ("begin", voucher.begin_time.to_rfc3339()),
                    ("end", voucher.end_time.to_rfc3339()),
                ],
                ttl,
            )
            .await
    }

    /// Read the cached campaign window. `None` if it is not cached.
    ///
    /// # Errors
    ///
    /// - store failures
    /// - [`FlashSaleError::Serialization`] if the hash is present but malformed
    pub async fn campaign_window(&self, voucher_id: VoucherId) -> Result<Option<CampaignWindowTimes>> {
        let fields = self.store.hash_get_all(&voucher_window_key(voucher_id)).await?;
        let (Some(begin), Some(end)) = (fields.get("begin"), fields.get("end")) else {
            return Ok(None);
        };

        let parse = |raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| {
                    FlashSaleError::Serialization(format!(
                        "campaign window of voucher {voucher_id}: {e}"
                    ))
                })
        };

        Ok(Some(CampaignWindowTimes {
            begin: parse(begin)?,
            end: parse(end)?,
        }))
    }

    fn ttl_until_end(&self, end: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
        let remaining = (end - now).to_std().unwrap_or(Duration::ZERO);
        Some(remaining + self.window_grace)
    }
}
