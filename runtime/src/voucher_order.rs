//! Flash-sale request path.
//!
//! `seckill_voucher` decides admit or reject using only the coordination
//! store, allocates an order id and hands the order to the [`OrderLog`]. It
//! never waits for the order to be committed.

use crate::admission::{CampaignWindowTimes, Reservation, SeckillAdmission};
use crate::id_worker::IdWorker;
use crate::metrics::AdmissionMetrics;
use flashsale_core::coordination::CoordinationStore;
use flashsale_core::environment::Clock;
use flashsale_core::keys::ORDER_ID_PREFIX;
use flashsale_core::order_log::OrderLog;
use flashsale_core::repository::VoucherRepository;
use flashsale_core::types::window_state;
use flashsale_core::{
    AdmissionOutcome, CampaignWindow, FlashSaleError, RequestContext, Result, SeckillVoucher,
    UserId, VoucherId, VoucherOrder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Admission service for seckill vouchers.
pub struct VoucherOrderService<S, V> {
    admission: SeckillAdmission<S>,
    ids: IdWorker<S>,
    vouchers: Arc<V>,
    log: Arc<dyn OrderLog>,
    clock: Arc<dyn Clock>,
}

impl<S, V> VoucherOrderService<S, V>
where
    S: CoordinationStore,
    V: VoucherRepository,
{
    /// Wire the service.
    ///
    /// `window_grace` is how long campaign keys outlive the sale window.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        vouchers: Arc<V>,
        log: Arc<dyn OrderLog>,
        clock: Arc<dyn Clock>,
        window_grace: Duration,
    ) -> Self {
        Self {
            admission: SeckillAdmission::new(Arc::clone(&store), window_grace),
            ids: IdWorker::new(store, Arc::clone(&clock)),
            vouchers,
            log,
            clock,
        }
    }

    /// The underlying admission gate.
    #[must_use]
    pub const fn admission(&self) -> &SeckillAdmission<S> {
        &self.admission
    }

    /// Try to buy one unit of `voucher_id` for the user in `ctx`.
    ///
    /// Validation outcomes (window, stock, duplicate) are returned as
    /// [`AdmissionOutcome`] values. Once a reservation is made, any failure to
    /// allocate an id or hand the order off undoes the reservation before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::VoucherNotFound`] if the voucher is unknown
    /// - [`FlashSaleError::CoordinationStore`] if the admission script cannot run
    /// - [`FlashSaleError::SequenceExhausted`], [`FlashSaleError::QueueFull`] or
    ///   [`FlashSaleError::OrderLog`] if the admitted order could not be handed off
    pub async fn seckill_voucher(
        &self,
        ctx: &RequestContext,
        voucher_id: VoucherId,
    ) -> Result<AdmissionOutcome> {
        let started = Instant::now();
        let result = self.admit(ctx, voucher_id).await;

        match &result {
            Ok(outcome) => {
                AdmissionMetrics::record(outcome.as_str(), started.elapsed());
                tracing::debug!(
                    request_id = %ctx.request_id,
                    user_id = %ctx.user_id,
                    %voucher_id,
                    outcome = outcome.as_str(),
                    "Seckill request decided"
                );
            }
            Err(e) => {
                AdmissionMetrics::record("error", started.elapsed());
                tracing::warn!(
                    request_id = %ctx.request_id,
                    user_id = %ctx.user_id,
                    %voucher_id,
                    error = %e,
                    "Seckill request rejected by failure"
                );
            }
        }

        result
    }

    async fn admit(&self, ctx: &RequestContext, voucher_id: VoucherId) -> Result<AdmissionOutcome> {
        let now = self.clock.now();
        let window = self.window(voucher_id).await?;

        match window_state(window.begin, window.end, now) {
            CampaignWindow::NotStarted => return Ok(AdmissionOutcome::CampaignNotStarted),
            CampaignWindow::Ended => return Ok(AdmissionOutcome::CampaignEnded),
            CampaignWindow::Open => {}
        }

        match self.admission.check_and_reserve(voucher_id, ctx.user_id).await? {
            Reservation::Reserved => {}
            Reservation::OutOfStock => return Ok(AdmissionOutcome::OutOfStock),
            Reservation::Duplicate => return Ok(AdmissionOutcome::Duplicate),
        }

        let order_id = match self.ids.next_id(ORDER_ID_PREFIX).await {
            Ok(id) => id,
            Err(e) => {
                self.undo_reservation(voucher_id, ctx.user_id).await;
                return Err(e);
            }
        };

        let order = VoucherOrder::new(order_id, ctx.user_id, voucher_id, now);
        if let Err(e) = self.log.publish(&order).await {
            self.undo_reservation(voucher_id, ctx.user_id).await;
            return Err(e.into());
        }

        Ok(AdmissionOutcome::Admitted { order_id })
    }

    /// Window from the cached hash, falling back to the voucher row.
    async fn window(&self, voucher_id: VoucherId) -> Result<CampaignWindowTimes> {
        if let Some(window) = self.admission.campaign_window(voucher_id).await? {
            return Ok(window);
        }

        let voucher = self
            .vouchers
            .find_seckill_voucher(voucher_id)
            .await?
            .ok_or(FlashSaleError::VoucherNotFound(voucher_id))?;

        if let Err(e) = self.admission.cache_window(&voucher, self.clock.now()).await {
            tracing::warn!(%voucher_id, error = %e, "Failed to re-warm campaign window");
        }

        Ok(CampaignWindowTimes {
            begin: voucher.begin_time,
            end: voucher.end_time,
        })
    }

    async fn undo_reservation(&self, voucher_id: VoucherId, user_id: UserId) {
        AdmissionMetrics::record_rollback();
        match self.admission.rollback(voucher_id, user_id).await {
            Ok(true) => tracing::info!(%voucher_id, %user_id, "Reservation rolled back"),
            Ok(false) => tracing::warn!(%voucher_id, %user_id, "No reservation to roll back"),
            Err(e) => tracing::error!(
                %voucher_id,
                %user_id,
                error = %e,
                "Reservation rollback failed, one unit of stock is stranded"
            ),
        }
    }

    /// Publish a new campaign: persist the voucher, then preload its hot state.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::InvalidArgument`] for negative stock or an inverted window
    /// - repository or store failures
    pub async fn add_seckill_voucher(&self, voucher: &SeckillVoucher) -> Result<()> {
        if voucher.stock < 0 || voucher.end_time < voucher.begin_time {
            return Err(FlashSaleError::InvalidArgument(format!(
                "voucher {} has negative stock or an inverted window",
                voucher.voucher_id
            )));
        }
        self.vouchers.save_seckill_voucher(voucher).await?;
        self.admission.preload(voucher, self.clock.now()).await
    }
}
