//! Error types for the quote multiplexer

use thiserror::Error;

/// Multiplexer errors
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Upstream authentication failed: {0}")]
    Authentication(String),

    #[error("Upstream rejected request with code {code}: {msg}")]
    UpstreamRejected { code: i64, msg: String },

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("REST API error: {0}")]
    RestApiError(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Connection timeout")]
    ConnectionTimeout,
}

impl MuxError {
    /// Whether the error belongs to the upstream transport and should trigger a reconnect
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MuxError::WebSocketConnection(_)
                | MuxError::WebSocketMessage(_)
                | MuxError::Authentication(_)
                | MuxError::UpstreamRejected { .. }
                | MuxError::ConnectionTimeout
        )
    }
}

/// Rejection of a viewer request. Reported back to the originating viewer only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Ticker must not be empty")]
    Empty,

    #[error("Ticker {0} must contain only letters and digits")]
    InvalidCharacters(String),

    #[error("Ticker {0} is longer than {max} characters", max = crate::symbol::MAX_SYMBOL_LEN)]
    TooLong(String),

    #[error("{0} is already in your watch-list")]
    Duplicate(String),

    #[error("Watch-list is limited to {0} tickers")]
    LimitReached(usize),

    #[error("Unknown session")]
    UnknownSession,
}

impl From<tokio_tungstenite::tungstenite::Error> for MuxError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MuxError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for MuxError {
    fn from(err: serde_json::Error) -> Self {
        MuxError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for MuxError {
    fn from(err: reqwest::Error) -> Self {
        MuxError::RestApiError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
