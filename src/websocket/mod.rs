//! WebSocket module for the upstream provider connection

mod client;
mod manager;
mod state;

pub use client::UpstreamClient;
pub use manager::UpstreamConnection;
pub use state::{ConnectionEvent, ConnectionState};
