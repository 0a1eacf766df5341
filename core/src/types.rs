//! Domain types shared by admission, caching and order commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of low bits of an [`OrderId`] holding the per-day sequence.
pub const COUNT_BITS: u32 = 32;

const SEQUENCE_MASK: i64 = (1 << COUNT_BITS) - 1;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Raw identifier value.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(
    /// Identifier of an end user.
    UserId
);
id_newtype!(
    /// Identifier of a seckill voucher (the flash-sale campaign).
    VoucherId
);
id_newtype!(
    /// Identifier of a shop.
    ShopId
);
id_newtype!(
    /// Time-ordered order identifier: `(seconds since epoch offset << 32) | sequence`.
    OrderId
);

impl OrderId {
    /// Combine a timestamp component and a per-day sequence.
    ///
    /// The sequence is truncated to [`COUNT_BITS`] bits.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flashsale_core::OrderId;
    /// let id = OrderId::compose(86_400, 7);
    /// assert_eq!(id.timestamp(), 86_400);
    /// assert_eq!(id.sequence(), 7);
    /// ```
    #[must_use]
    pub const fn compose(timestamp: i64, sequence: i64) -> Self {
        Self((timestamp << COUNT_BITS) | (sequence & SEQUENCE_MASK))
    }

    /// Seconds since the generator epoch offset.
    #[must_use]
    pub const fn timestamp(self) -> i64 {
        self.0 >> COUNT_BITS
    }

    /// Per-day sequence component (always non-negative).
    #[must_use]
    pub const fn sequence(self) -> i64 {
        self.0 & SEQUENCE_MASK
    }
}

/// An order admitted by the flash sale and awaiting (or past) durable commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherOrder {
    /// Order identifier from the ID worker
    pub id: OrderId,
    /// Buyer
    pub user_id: UserId,
    /// Campaign
    pub voucher_id: VoucherId,
    /// Admission time
    pub created_at: DateTime<Utc>,
}

impl VoucherOrder {
    /// Create a new order.
    #[must_use]
    pub const fn new(
        id: OrderId,
        user_id: UserId,
        voucher_id: VoucherId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            voucher_id,
            created_at,
        }
    }
}

/// Where `now` falls relative to a campaign window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignWindow {
    /// Before `begin_time`
    NotStarted,
    /// Within `[begin_time, end_time]`
    Open,
    /// After `end_time`
    Ended,
}

/// A flash-sale campaign: finite stock sold within a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeckillVoucher {
    /// Campaign identifier
    pub voucher_id: VoucherId,
    /// Remaining stock in the backing store
    pub stock: i32,
    /// Sale opens
    pub begin_time: DateTime<Utc>,
    /// Sale closes
    pub end_time: DateTime<Utc>,
}

impl SeckillVoucher {
    /// Classify `now` against the sale window.
    #[must_use]
    pub fn window_state(&self, now: DateTime<Utc>) -> CampaignWindow {
        window_state(self.begin_time, self.end_time, now)
    }
}

/// Classify `now` against a `[begin, end]` window.
#[must_use]
pub fn window_state(
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CampaignWindow {
    if now < begin {
        CampaignWindow::NotStarted
    } else if now > end {
        CampaignWindow::Ended
    } else {
        CampaignWindow::Open
    }
}

/// Read-mostly storefront entity served through the cache-aside strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    /// Shop identifier
    pub id: ShopId,
    /// Display name
    pub name: String,
    /// Business district
    pub area: String,
    /// Street address
    pub address: String,
    /// Average rating (0-50, one decimal scaled by 10)
    pub score: i32,
}

/// Request-scoped context passed explicitly through every call boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Authenticated user making the request
    pub user_id: UserId,
    /// Correlation id for logs
    pub request_id: Uuid,
}

impl RequestContext {
    /// Context for `user_id` with a fresh request id.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            request_id: Uuid::new_v4(),
        }
    }
}

/// Result of a flash-sale admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Stock reserved; the order will be committed asynchronously.
    Admitted {
        /// Identifier returned to the buyer
        order_id: OrderId,
    },
    /// No stock left.
    OutOfStock,
    /// The user already holds an admission for this campaign.
    Duplicate,
    /// The campaign window has not opened.
    CampaignNotStarted,
    /// The campaign window has closed.
    CampaignEnded,
}

impl AdmissionOutcome {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admitted { .. } => "admitted",
            Self::OutOfStock => "out_of_stock",
            Self::Duplicate => "duplicate",
            Self::CampaignNotStarted => "not_started",
            Self::CampaignEnded => "ended",
        }
    }

    /// Order id if admitted.
    #[must_use]
    pub const fn order_id(&self) -> Option<OrderId> {
        match self {
            Self::Admitted { order_id } => Some(*order_id),
            _ => None,
        }
    }
}

/// Result of the transactional commit unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Stock decremented and order row inserted.
    Committed,
    /// An order for (user, voucher) already exists; nothing changed.
    DuplicateOrder,
    /// Stock row was already zero; nothing changed.
    OutOfStock,
}

impl CommitOutcome {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::DuplicateOrder => "duplicate",
            Self::OutOfStock => "out_of_stock",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn order_id_components_decode(ts in 0i64..(1 << 30), seq in 0i64..(1 << 32)) {
            let id = OrderId::compose(ts, seq);
            prop_assert_eq!(id.timestamp(), ts);
            prop_assert_eq!(id.sequence(), seq);
            prop_assert!(id.get() >= 0);
        }

        #[test]
        fn order_ids_order_by_time_then_sequence(
            ts in 0i64..(1 << 30),
            a in 0i64..(1 << 32),
            b in 0i64..(1 << 32),
        ) {
            prop_assert_eq!(
                OrderId::compose(ts, a) < OrderId::compose(ts, b),
                a < b
            );
            prop_assert!(OrderId::compose(ts, a) < OrderId::compose(ts + 1, b));
        }
    }

    #[test]
    fn window_state_boundaries() {
        let begin = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).single().unwrap_or_default();
        let voucher = SeckillVoucher {
            voucher_id: VoucherId(1),
            stock: 10,
            begin_time: begin,
            end_time: begin + Duration::hours(1),
        };

        assert_eq!(
            voucher.window_state(begin - Duration::seconds(1)),
            CampaignWindow::NotStarted
        );
        assert_eq!(voucher.window_state(begin), CampaignWindow::Open);
        assert_eq!(
            voucher.window_state(begin + Duration::hours(1)),
            CampaignWindow::Open
        );
        assert_eq!(
            voucher.window_state(begin + Duration::hours(2)),
            CampaignWindow::Ended
        );
    }

    #[test]
    fn voucher_order_json_uses_camel_case() {
        let order = VoucherOrder::new(
            OrderId(42),
            UserId(7),
            VoucherId(3),
            Utc.timestamp_opt(0, 0).single().unwrap_or_default(),
        );
        let json = serde_json::to_value(&order).unwrap_or_default();
        assert_eq!(json["userId"], 7);
        assert_eq!(json["voucherId"], 3);
        assert_eq!(json["id"], 42);
    }

    #[test]
    fn admission_outcome_labels() {
        let admitted = AdmissionOutcome::Admitted {
            order_id: OrderId(5),
        };
        assert_eq!(admitted.as_str(), "admitted");
        assert_eq!(admitted.order_id(), Some(OrderId(5)));
        assert_eq!(AdmissionOutcome::Duplicate.order_id(), None);
    }
}
