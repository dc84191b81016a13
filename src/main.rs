//! Quote Mux - Real-time Quote Multiplexer
//!
//! Connects once to the market data provider, serves viewer watch-lists over
//! WebSocket, and exposes health and metrics endpoints.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quote_mux::server::{self, AppState};
use quote_mux::{
    CommandQueue, Config, Multiplexer, PollingFallback, RestQuoteProvider, UpstreamConnection,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Quote Mux");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!(
        ws_endpoint = %config.ws_endpoint,
        bind = %config.http_bind_addr,
        "Configuration loaded"
    );

    let provider = Arc::new(RestQuoteProvider::new(&config)?);
    let (diffs_tx, diffs_rx) = mpsc::unbounded_channel();
    let mux = Arc::new(Multiplexer::new(&config, provider, diffs_tx));

    // Upstream connection
    let mut upstream = UpstreamConnection::new(&config, mux.clone(), diffs_rx);
    let upstream_state = upstream.state_receiver();
    tokio::spawn(async move { upstream.run().await });

    // Polling fallback
    let poller = PollingFallback::new(&config, mux.clone());
    tokio::spawn(async move { poller.run().await });

    // Periodic status line
    tokio::spawn(server::log_status(
        mux.clone(),
        upstream_state.clone(),
        Duration::from_secs(config.status_log_interval_secs.max(1)),
    ));

    let state = AppState {
        commands: CommandQueue::spawn(mux.clone()),
        mux,
        upstream: upstream_state,
    };

    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr).await?;
    info!(addr = %config.http_bind_addr, "Starting HTTP server");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Quote Mux stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
