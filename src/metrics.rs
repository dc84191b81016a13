//! Prometheus metrics, registered in the default registry

use std::sync::LazyLock;

use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

pub static PUSH_QUOTES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("quote_mux_push_quotes_total", "Quotes received from the push feed")
        .expect("metric can be registered")
});

pub static POLL_QUOTES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("quote_mux_poll_quotes_total", "Quotes fetched by the polling fallback")
        .expect("metric can be registered")
});

pub static DISCARDED_QUOTES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "quote_mux_discarded_quotes_total",
        "Quotes dropped as invalid, stale or unwatched"
    )
    .expect("metric can be registered")
});

pub static FANOUT_DELIVERIES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "quote_mux_fanout_deliveries_total",
        "Quote events queued to viewer sessions"
    )
    .expect("metric can be registered")
});

pub static DROPPED_EVENTS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "quote_mux_dropped_events_total",
        "Viewer events dropped because the session queue was full"
    )
    .expect("metric can be registered")
});

pub static UPSTREAM_RECONNECTS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "quote_mux_upstream_reconnects_total",
        "Upstream connection attempts after a failure"
    )
    .expect("metric can be registered")
});

pub static LIVE_SESSIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("quote_mux_live_sessions", "Connected viewer sessions")
        .expect("metric can be registered")
});

pub static GLOBAL_SYMBOLS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "quote_mux_global_symbols",
        "Symbols in the global upstream subscription"
    )
    .expect("metric can be registered")
});
