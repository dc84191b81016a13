//! Quote module
//!
//! Normalized quotes from either the push feed or the polling fallback,
//! plus the last-known-quote cache.

mod cache;

pub use cache::QuoteCache;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::symbol::Symbol;

/// Where a quote came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSource {
    Push,
    Poll,
}

/// Market session at the time a quote was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketHours {
    Open,
    Closed,
}

impl From<bool> for MarketHours {
    fn from(is_open: bool) -> Self {
        if is_open {
            MarketHours::Open
        } else {
            MarketHours::Closed
        }
    }
}

/// Top-of-book quote as delivered to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    #[serde(with = "rust_decimal::serde::float")]
    pub bid_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub ask_price: Decimal,
    pub bid_size: u64,
    pub ask_size: u64,
    pub timestamp: DateTime<Utc>,
    pub source: QuoteSource,
    pub market_hours: MarketHours,
}

impl Quote {
    /// A quote carrying neither a bid nor an ask is noise from the provider
    pub fn is_valid(&self) -> bool {
        !(self.bid_price.is_zero() && self.ask_price.is_zero())
    }
}

/// Market clock as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatus {
    pub is_open: bool,
    pub next_open: Option<DateTime<Utc>>,
    pub next_close: Option<DateTime<Utc>>,
}

impl MarketStatus {
    /// Status used before the provider has been reached
    pub fn unknown() -> Self {
        Self {
            is_open: false,
            next_open: None,
            next_close: None,
        }
    }
}
