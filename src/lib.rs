//! Quote Mux - Real-time Quote Multiplexer Library
//!
//! Holds one upstream market data connection and fans its quotes out to any
//! number of viewer sessions, each with its own watch-list. A polling
//! fallback keeps quotes flowing while the push feed is down.

pub mod config;
pub mod error;
pub mod metrics;
pub mod multiplexer;
pub mod parser;
pub mod polling;
pub mod provider;
pub mod publisher;
pub mod quotes;
pub mod registry;
pub mod server;
pub mod symbol;
pub mod viewer;
pub mod websocket;

pub use config::Config;
pub use error::{MuxError, Result, ValidationError};
pub use multiplexer::Multiplexer;
pub use parser::{InboundFrame, OutboundFrame};
pub use polling::{PollReport, PollingFallback};
pub use provider::{QuoteProvider, RestQuoteProvider};
pub use publisher::Publisher;
pub use quotes::{MarketHours, MarketStatus, Quote, QuoteCache, QuoteSource};
pub use registry::{SessionId, SubscriptionAggregator, SubscriptionDiff, WatchlistRegistry};
pub use server::AppState;
pub use symbol::Symbol;
pub use viewer::{CommandQueue, ViewerCommand, ViewerEvent};
pub use websocket::{ConnectionState, UpstreamConnection};
