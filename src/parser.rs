//! Parser module for the provider's push protocol
//!
//! Inbound messages are JSON arrays of frames tagged by `T`; outbound
//! control messages are single JSON objects tagged by `action`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::quotes::{MarketHours, Quote, QuoteSource};
use crate::symbol::Symbol;

/// Message text of the success frame acknowledging authentication
pub const AUTHENTICATED: &str = "authenticated";

/// Provider error codes after which the connection cannot be used
pub const FATAL_ERROR_CODES: &[i64] = &[401, 402, 404, 405, 406, 409];

/// Raw quote frame
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteFrame {
    /// Symbol
    #[serde(rename = "S")]
    pub symbol: String,

    /// Bid price
    #[serde(rename = "bp", default, with = "rust_decimal::serde::float")]
    pub bid_price: Decimal,

    /// Ask price
    #[serde(rename = "ap", default, with = "rust_decimal::serde::float")]
    pub ask_price: Decimal,

    /// Bid size
    #[serde(rename = "bs", default)]
    pub bid_size: u64,

    /// Ask size
    #[serde(rename = "as", default)]
    pub ask_size: u64,

    /// Quote time (RFC 3339)
    #[serde(rename = "t", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl QuoteFrame {
    /// Normalize into a push quote; fails if the symbol is not a valid ticker
    pub fn into_quote(self) -> std::result::Result<Quote, crate::error::ValidationError> {
        Ok(Quote {
            symbol: Symbol::parse(&self.symbol)?,
            bid_price: self.bid_price,
            ask_price: self.ask_price,
            bid_size: self.bid_size,
            ask_size: self.ask_size,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            source: QuoteSource::Push,
            market_hours: MarketHours::Open,
        })
    }
}

/// One inbound frame
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "T")]
pub enum InboundFrame {
    #[serde(rename = "success")]
    Success { msg: String },

    #[serde(rename = "subscription")]
    Subscription {
        #[serde(default)]
        quotes: Vec<String>,
    },

    #[serde(rename = "q")]
    Quote(QuoteFrame),

    #[serde(rename = "error")]
    Error { code: i64, msg: String },

    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Parse a raw push message.
    ///
    /// A malformed element is logged and skipped; the rest of the batch is kept.
    /// A message that is not a JSON array (or a single object) is an error.
    pub fn parse_batch(raw: &str) -> Result<Vec<InboundFrame>> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let elements = match value {
            serde_json::Value::Array(elements) => elements,
            object @ serde_json::Value::Object(_) => vec![object],
            other => {
                return Err(crate::error::MuxError::ParseError(format!(
                    "Unexpected message shape: {}",
                    other
                )))
            }
        };

        Ok(elements
            .into_iter()
            .filter_map(|element| match serde_json::from_value::<InboundFrame>(element) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed frame");
                    None
                }
            })
            .collect())
    }

    /// Whether this frame acknowledges authentication
    pub fn is_auth_ack(&self) -> bool {
        matches!(self, InboundFrame::Success { msg } if msg == AUTHENTICATED)
    }
}

/// Whether an error frame code makes the connection unusable
pub fn is_fatal_error(code: i64) -> bool {
    FATAL_ERROR_CODES.contains(&code)
}

/// Outbound control message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OutboundFrame {
    Auth { key: String, secret: String },
    Subscribe { quotes: Vec<String> },
    Unsubscribe { quotes: Vec<String> },
}

impl OutboundFrame {
    pub fn subscribe<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Self {
        OutboundFrame::Subscribe {
            quotes: symbols.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn unsubscribe<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Self {
        OutboundFrame::Unsubscribe {
            quotes: symbols.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| crate::error::MuxError::SerializationError(e.to_string()))
    }
}
