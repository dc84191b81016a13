//! Configuration module for the quote multiplexer

use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::MuxError;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// WebSocket endpoint of the provider's quote stream
    pub ws_endpoint: String,

    /// REST endpoint for latest quotes
    pub data_rest_endpoint: String,

    /// REST endpoint for the market clock
    pub trading_rest_endpoint: String,

    /// Provider credentials
    pub api_key: String,
    pub api_secret: String,

    /// Address the viewer/health HTTP server binds to
    pub http_bind_addr: String,

    /// Fixed delay between upstream reconnect attempts
    pub reconnect_delay_ms: u64,

    /// Silence on the upstream socket before a keepalive ping is sent
    pub recv_timeout_secs: u64,

    /// Polling interval while the market is open / closed
    pub poll_open_secs: u64,
    pub poll_closed_secs: u64,

    /// Watch-list size limit per viewer
    pub max_symbols_per_session: usize,

    /// Outbound events buffered per viewer before new ones are dropped
    pub session_queue_capacity: usize,

    /// Status log interval in seconds
    pub status_log_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let api_key = env::var("APCA_API_KEY_ID")
            .map_err(|_| MuxError::ConfigError("APCA_API_KEY_ID is not set".to_string()))?;
        let api_secret = env::var("APCA_API_SECRET_KEY")
            .map_err(|_| MuxError::ConfigError("APCA_API_SECRET_KEY is not set".to_string()))?;

        let defaults = Self::default();

        Ok(Self {
            ws_endpoint: env::var("WS_ENDPOINT").unwrap_or(defaults.ws_endpoint),
            data_rest_endpoint: env::var("DATA_REST_ENDPOINT")
                .unwrap_or(defaults.data_rest_endpoint),
            trading_rest_endpoint: env::var("TRADING_REST_ENDPOINT")
                .unwrap_or(defaults.trading_rest_endpoint),
            api_key,
            api_secret,
            http_bind_addr: env::var("HTTP_BIND_ADDR").unwrap_or(defaults.http_bind_addr),
            reconnect_delay_ms: env_or("RECONNECT_DELAY_MS", defaults.reconnect_delay_ms),
            recv_timeout_secs: env_or("RECV_TIMEOUT_SECS", defaults.recv_timeout_secs),
            poll_open_secs: env_or("POLL_OPEN_SECS", defaults.poll_open_secs),
            poll_closed_secs: env_or("POLL_CLOSED_SECS", defaults.poll_closed_secs),
            max_symbols_per_session: env_or(
                "MAX_SYMBOLS_PER_SESSION",
                defaults.max_symbols_per_session,
            ),
            session_queue_capacity: env_or(
                "SESSION_QUEUE_CAPACITY",
                defaults.session_queue_capacity,
            ),
            status_log_interval_secs: env_or(
                "STATUS_LOG_INTERVAL_SECS",
                defaults.status_log_interval_secs,
            ),
        })
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_secs(self.recv_timeout_secs)
    }

    /// Polling interval for the given market state
    pub fn poll_interval(&self, market_open: bool) -> Duration {
        if market_open {
            Duration::from_secs(self.poll_open_secs)
        } else {
            Duration::from_secs(self.poll_closed_secs)
        }
    }
}

/// Parse an environment variable, falling back to the default when unset or malformed
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_endpoint: "wss://stream.data.alpaca.markets/v2/delayed_sip".to_string(),
            data_rest_endpoint: "https://data.alpaca.markets/v2".to_string(),
            trading_rest_endpoint: "https://paper-api.alpaca.markets/v2".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            http_bind_addr: "0.0.0.0:8080".to_string(),
            reconnect_delay_ms: 5000,
            recv_timeout_secs: 45,
            poll_open_secs: 30,
            poll_closed_secs: 180,
            max_symbols_per_session: 30,
            session_queue_capacity: crate::publisher::DEFAULT_QUEUE_CAPACITY,
            status_log_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_depends_on_market() {
        let config = Config::default();
        assert_eq!(config.poll_interval(true), Duration::from_secs(30));
        assert_eq!(config.poll_interval(false), Duration::from_secs(180));
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("QUOTE_MUX_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("QUOTE_MUX_TEST_GARBAGE", 7u64), 7);
        env::set_var("QUOTE_MUX_TEST_NUMBER", " 12 ");
        assert_eq!(env_or("QUOTE_MUX_TEST_NUMBER", 7u64), 12);
    }
}
