//! Stockr - automatic inventory restocking against transient counterparties
//!
//! Stockr schedules purchase transactions for one consumer against a pool
//! of short-lived, independently-priced counterparties, under concurrency
//! and lifetime caps, price-tier admission thresholds, a budget reserve,
//! and downstream fulfillment backpressure.

pub mod config;
pub mod domain;
pub mod error;
pub mod host;
pub mod scheduler;
pub mod store;

pub use error::{Result, StockrError};
