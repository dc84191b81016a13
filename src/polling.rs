//! Polling fallback
//!
//! Periodically re-fetches every watched symbol over request/response and
//! re-broadcasts the market clock. Runs regardless of the upstream state and
//! is what keeps quotes moving while the push feed is down or silent.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::multiplexer::Multiplexer;

/// Outcome of one polling cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub market_open: bool,
    pub requested: usize,
    pub delivered: usize,
}

pub struct PollingFallback {
    mux: Arc<Multiplexer>,
    open_interval: Duration,
    closed_interval: Duration,
}

impl PollingFallback {
    pub fn new(config: &Config, mux: Arc<Multiplexer>) -> Self {
        Self {
            mux,
            open_interval: config.poll_interval(true),
            closed_interval: config.poll_interval(false),
        }
    }

    /// Run forever
    pub async fn run(&self) {
        info!(
            open_secs = self.open_interval.as_secs(),
            closed_secs = self.closed_interval.as_secs(),
            "Starting polling fallback"
        );

        loop {
            let report = self.run_cycle().await;
            let delay = self.interval(report.market_open);
            debug!(
                requested = report.requested,
                delivered = report.delivered,
                next_in_secs = delay.as_secs(),
                "Polling cycle finished"
            );
            sleep(delay).await;
        }
    }

    /// One cycle: market status first, then every watched symbol
    pub async fn run_cycle(&self) -> PollReport {
        let market_open = match self.mux.provider().market_status().await {
            Ok(status) => {
                let is_open = status.is_open;
                self.mux.publish_market_status(status).await;
                is_open
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch market status, keeping last known");
                self.mux.market_status().await.is_open
            }
        };

        let symbols = self.mux.snapshot().await;
        let mut delivered = 0;
        for symbol in &symbols {
            if self.mux.refresh_symbol(symbol).await {
                delivered += 1;
            }
        }

        PollReport {
            market_open,
            requested: symbols.len(),
            delivered,
        }
    }

    pub fn interval(&self, market_open: bool) -> Duration {
        if market_open {
            self.open_interval
        } else {
            self.closed_interval
        }
    }
}
