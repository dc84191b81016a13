//! Request/response access to the market data provider
//!
//! The polling fallback and the per-add refresh only need two calls: the
//! latest quote of one symbol and the market clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::quotes::{MarketHours, MarketStatus, Quote, QuoteSource};
use crate::symbol::Symbol;

/// Collaborator interface consumed by the multiplexer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Latest quote for a symbol, `None` if the provider has none
    async fn fetch_latest_quote(&self, symbol: &Symbol) -> Result<Option<Quote>>;

    /// Current market clock
    async fn market_status(&self) -> Result<MarketStatus>;
}

/// Latest-quote endpoint payload
#[derive(Debug, Deserialize)]
struct LatestQuoteResponse {
    quote: QuoteFrameBody,
}

#[derive(Debug, Deserialize)]
struct QuoteFrameBody {
    #[serde(rename = "bp", default, with = "rust_decimal::serde::float")]
    bid_price: rust_decimal::Decimal,
    #[serde(rename = "ap", default, with = "rust_decimal::serde::float")]
    ask_price: rust_decimal::Decimal,
    #[serde(rename = "bs", default)]
    bid_size: u64,
    #[serde(rename = "as", default)]
    ask_size: u64,
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
}

/// Market clock endpoint payload
#[derive(Debug, Deserialize)]
struct ClockResponse {
    is_open: bool,
    next_open: Option<DateTime<Utc>>,
    next_close: Option<DateTime<Utc>>,
}

/// Provider REST client
pub struct RestQuoteProvider {
    client: Client,
    data_endpoint: String,
    trading_endpoint: String,
    api_key: String,
    api_secret: String,
}

impl RestQuoteProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("quote-mux/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            data_endpoint: config.data_rest_endpoint.trim_end_matches('/').to_string(),
            trading_endpoint: config.trading_rest_endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }
}

#[async_trait]
impl QuoteProvider for RestQuoteProvider {
    async fn fetch_latest_quote(&self, symbol: &Symbol) -> Result<Option<Quote>> {
        let url = format!("{}/stocks/{}/quotes/latest", self.data_endpoint, symbol);
        debug!(symbol = %symbol, url = %url, "Fetching latest quote");

        let response = self.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(MuxError::Provider(format!(
                "latest quote for {} returned {}",
                symbol,
                response.status()
            )));
        }

        let body = response.json::<LatestQuoteResponse>().await?.quote;
        Ok(Some(Quote {
            symbol: symbol.clone(),
            bid_price: body.bid_price,
            ask_price: body.ask_price,
            bid_size: body.bid_size,
            ask_size: body.ask_size,
            timestamp: body.timestamp,
            source: QuoteSource::Poll,
            market_hours: MarketHours::Closed,
        }))
    }

    async fn market_status(&self) -> Result<MarketStatus> {
        let url = format!("{}/clock", self.trading_endpoint);

        let response = self.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(MuxError::Provider(format!(
                "market clock returned {}",
                response.status()
            )));
        }

        let clock = response.json::<ClockResponse>().await?;
        Ok(MarketStatus {
            is_open: clock.is_open,
            next_open: clock.next_open,
            next_close: clock.next_close,
        })
    }
}
