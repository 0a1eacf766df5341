//! # Flashsale Core
//!
//! Core types and collaborator traits for the flash-sale (seckill) order pipeline.
//!
//! The pipeline splits a purchase into two halves that run at very different speeds:
//!
//! ```text
//!  request ──► window pre-check ──► atomic admission script ──► order id ──► order log
//!                                      (coordination store)                    │
//!                                                                              ▼
//!                                  commit worker ◄── per-user lock ◄── single consumer
//!                                        │
//!                                        ▼
//!                         transactional re-check + stock decrement + insert
//! ```
//!
//! This crate only defines the vocabulary shared by both halves:
//!
//! - [`types`]: identifiers, orders, vouchers, shops and outcome enums
//! - [`error`]: the error taxonomy (contention, validation, infrastructure, integrity)
//! - [`coordination`]: the key-value coordination store and its atomic scripts
//! - [`repository`]: the relational backing store
//! - [`order_log`]: the hand-off between admission and commit
//! - [`environment`]: clock abstraction
//! - [`keys`]: key namespace and TTL constants
//!
//! Concrete implementations live in `flashsale-redis`, `flashsale-postgres`,
//! `flashsale-redpanda` and (in memory) `flashsale-testing`.

pub mod coordination;
pub mod environment;
pub mod error;
pub mod keys;
pub mod order_log;
pub mod repository;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{ErrorKind, FlashSaleError, Result};
pub use types::{
    AdmissionOutcome, CampaignWindow, CommitOutcome, OrderId, RequestContext, SeckillVoucher,
    Shop, ShopId, UserId, VoucherId, VoucherOrder,
};
