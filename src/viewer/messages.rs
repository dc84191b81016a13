//! Viewer event types
//!
//! Every frame on the viewer socket is a JSON object `{"event": .., "data": ..}`.

use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};
use crate::quotes::{MarketStatus, Quote};
use crate::symbol::Symbol;

/// Viewer -> server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ViewerCommand {
    AddTicker { ticker: String },
    RemoveTicker { ticker: String },
    RequestAllData,
}

impl ViewerCommand {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| MuxError::ParseError(e.to_string()))
    }
}

/// Payload tag carried by every quote event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteKind {
    Quote,
}

/// Server -> viewer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ViewerEvent {
    Watchlist {
        tickers: Vec<Symbol>,
    },
    Quote {
        data: Quote,
        #[serde(rename = "type")]
        kind: QuoteKind,
    },
    MarketStatus(MarketStatus),
    Error {
        message: String,
    },
}

impl ViewerEvent {
    pub fn quote(quote: Quote) -> Self {
        ViewerEvent::Quote {
            data: quote,
            kind: QuoteKind::Quote,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ViewerEvent::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| MuxError::SerializationError(e.to_string()))
    }
}
