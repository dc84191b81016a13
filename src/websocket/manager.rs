//! Upstream connection supervisor
//!
//! Owns the single provider connection: drives the state machine, sends the
//! full resubscribe after every authentication, applies live diffs, and
//! reconnects after a fixed backoff forever.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use super::{ConnectionEvent, ConnectionState, UpstreamClient};
use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::metrics;
use crate::multiplexer::Multiplexer;
use crate::parser::{is_fatal_error, InboundFrame, OutboundFrame};
use crate::registry::SubscriptionDiff;

/// Silence after which a keepalive ping is sent alongside control frames
const KEEPALIVE_AFTER: Duration = Duration::from_secs(30);

enum Wakeup {
    Received(std::result::Result<Result<Option<String>>, tokio::time::error::Elapsed>),
    Diff(SubscriptionDiff),
}

/// Manages the upstream connection with automatic reconnection
pub struct UpstreamConnection {
    mux: Arc<Multiplexer>,
    client: UpstreamClient,
    diffs: mpsc::UnboundedReceiver<SubscriptionDiff>,
    state: watch::Sender<ConnectionState>,
    api_key: String,
    api_secret: String,
    reconnect_delay: Duration,
    recv_timeout: Duration,
    reconnect_attempts: u64,
}

impl UpstreamConnection {
    /// Create a new supervisor; `diffs` is the receiving end of the
    /// multiplexer's subscription diff queue
    pub fn new(
        config: &Config,
        mux: Arc<Multiplexer>,
        diffs: mpsc::UnboundedReceiver<SubscriptionDiff>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            mux,
            client: UpstreamClient::new(&config.ws_endpoint),
            diffs,
            state,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            reconnect_delay: config.reconnect_delay(),
            recv_timeout: config.recv_timeout(),
            reconnect_attempts: 0,
        }
    }

    /// Watch the connection state
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Run the supervisor - runs indefinitely with automatic reconnection
    pub async fn run(&mut self) {
        info!("Starting upstream connection supervisor with infinite retry");

        loop {
            // Diffs queued while disconnected are superseded by the full
            // resubscribe that follows authentication.
            let stale = self.drain_diffs();
            if stale > 0 {
                debug!(dropped = stale, "Dropped diffs queued while disconnected");
            }

            match self.connect_and_process().await {
                Ok(()) => info!("Upstream session ended, reconnecting..."),
                Err(e) => error!(error = %e, "Upstream connection error"),
            }

            self.client.close().await;
            self.transition(ConnectionEvent::Failed);
            self.reconnect_attempts += 1;
            metrics::UPSTREAM_RECONNECTS.inc();

            warn!(
                attempt = self.reconnect_attempts,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "Reconnecting after backoff..."
            );
            sleep(self.reconnect_delay).await;
        }
    }

    /// Connect, authenticate and process messages until the connection fails
    async fn connect_and_process(&mut self) -> Result<()> {
        self.transition(ConnectionEvent::Connect);
        self.client.connect().await?;

        self.transition(ConnectionEvent::Opened);
        self.client
            .send(&OutboundFrame::Auth {
                key: self.api_key.clone(),
                secret: self.api_secret.clone(),
            })
            .await?;
        debug!("Sent auth handshake");

        let mut last_message = Instant::now();

        loop {
            let wakeup = tokio::select! {
                received = timeout(self.recv_timeout, self.client.recv()) => Wakeup::Received(received),
                Some(diff) = self.diffs.recv() => Wakeup::Diff(diff),
            };

            match wakeup {
                Wakeup::Received(Ok(Ok(Some(text)))) => {
                    last_message = Instant::now();
                    if let Err(e) = self.process_message(&text).await {
                        if e.is_transport() {
                            return Err(e);
                        }
                        warn!(error = %e, "Failed to process message");
                    }
                }
                Wakeup::Received(Ok(Ok(None))) => {
                    if last_message.elapsed() > KEEPALIVE_AFTER {
                        if let Err(e) = self.client.ping().await {
                            warn!(error = %e, "Failed to send keepalive ping");
                        }
                    }
                }
                Wakeup::Received(Ok(Err(e))) => return Err(e),
                Wakeup::Received(Err(_)) => {
                    warn!(
                        last_message_secs = last_message.elapsed().as_secs(),
                        "No message received within timeout, sending keepalive"
                    );
                    if let Err(e) = self.client.ping().await {
                        warn!(error = %e, "Failed to send keepalive ping, reconnecting");
                        return Err(MuxError::ConnectionTimeout);
                    }
                }
                Wakeup::Diff(diff) => self.apply_diff(diff).await?,
            }
        }
    }

    /// Process a single push message
    async fn process_message(&mut self, raw: &str) -> Result<()> {
        for frame in InboundFrame::parse_batch(raw)? {
            match frame {
                frame if frame.is_auth_ack() => self.on_authenticated().await?,
                InboundFrame::Success { msg } => {
                    info!(msg = %msg, "Upstream status");
                }
                InboundFrame::Subscription { quotes } => {
                    info!(quotes = quotes.len(), "Upstream subscription acknowledged");
                }
                InboundFrame::Quote(frame) => {
                    metrics::PUSH_QUOTES.inc();
                    match frame.into_quote() {
                        Ok(quote) => {
                            self.mux.ingest(quote).await;
                        }
                        Err(e) => {
                            metrics::DISCARDED_QUOTES.inc();
                            debug!(error = %e, "Ignoring quote for unsupported symbol");
                        }
                    }
                }
                InboundFrame::Error { code, msg } if is_fatal_error(code) => {
                    error!(code, msg = %msg, "Fatal upstream error frame");
                    return Err(if self.state() == ConnectionState::Authenticating {
                        MuxError::Authentication(msg)
                    } else {
                        MuxError::UpstreamRejected { code, msg }
                    });
                }
                InboundFrame::Error { code, msg } => {
                    warn!(code, msg = %msg, "Upstream error frame");
                }
                InboundFrame::Unknown => {
                    trace!("Unknown frame type");
                }
            }
        }

        Ok(())
    }

    /// Authentication acknowledged: subscribe to the whole global set
    async fn on_authenticated(&mut self) -> Result<()> {
        if !self.transition(ConnectionEvent::Authenticated) {
            warn!("Unexpected authentication acknowledgement");
            return Ok(());
        }
        self.reconnect_attempts = 0;

        let symbols = self.mux.snapshot().await;
        info!(symbols = symbols.len(), "Authenticated, resubscribing full watch set");

        if !symbols.is_empty() {
            self.client.send(&OutboundFrame::subscribe(&symbols)).await?;
        }
        Ok(())
    }

    /// Send an incremental subscription change; dropped unless subscribed
    async fn apply_diff(&mut self, diff: SubscriptionDiff) -> Result<()> {
        if !self.state().accepts_diffs() {
            debug!(state = ?self.state(), ?diff, "Dropping diff, not subscribed");
            return Ok(());
        }

        if !diff.added.is_empty() {
            debug!(symbols = ?diff.added, "Subscribing");
            self.client.send(&OutboundFrame::subscribe(&diff.added)).await?;
        }
        if !diff.removed.is_empty() {
            debug!(symbols = ?diff.removed, "Unsubscribing");
            self.client
                .send(&OutboundFrame::unsubscribe(&diff.removed))
                .await?;
        }
        Ok(())
    }

    fn drain_diffs(&mut self) -> usize {
        let mut dropped = 0;
        while self.diffs.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Apply an event to the state machine; false if it was not valid
    fn transition(&self, event: ConnectionEvent) -> bool {
        let current = self.state();
        match current.next(event) {
            Some(next) => {
                if next != current {
                    debug!(from = ?current, to = ?next, "Upstream state change");
                }
                self.state.send_replace(next);
                true
            }
            None => false,
        }
    }
}
