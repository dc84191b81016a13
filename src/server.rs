//! HTTP surface: the viewer WebSocket plus health and metrics endpoints

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::multiplexer::Multiplexer;
use crate::viewer::{watchlist_socket, CommandQueue, ViewerState};
use crate::websocket::ConnectionState;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub mux: Arc<Multiplexer>,
    pub commands: CommandQueue,
    pub upstream: watch::Receiver<ConnectionState>,
}

impl FromRef<AppState> for ViewerState {
    fn from_ref(state: &AppState) -> Self {
        ViewerState {
            mux: state.mux.clone(),
            commands: state.commands.clone(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/watchlist", get(watchlist_socket))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let upstream = *state.upstream.borrow();
    let market = state.mux.market_status().await;
    let sessions = state.mux.session_count().await;
    let symbols = state.mux.snapshot().await.len();
    let cached = state.mux.cached_count().await;

    Json(serde_json::json!({
        "status": "healthy",
        "component": "quote-mux",
        "upstream": upstream,
        "market_open": market.is_open,
        "sessions": sessions,
        "symbols": symbols,
        "cached_quotes": cached,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Log a status line every `every` until the task is dropped
pub async fn log_status(
    mux: Arc<Multiplexer>,
    upstream: watch::Receiver<ConnectionState>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let state = *upstream.borrow();
        let sessions = mux.session_count().await;
        let symbols = mux.snapshot().await.len();
        let cached = mux.cached_count().await;
        info!(upstream = ?state, sessions, symbols, cached, "Status");
    }
}

async fn metrics() -> Result<String, StatusCode> {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
