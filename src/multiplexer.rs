//! Subscription multiplexer
//!
//! The one instance per process that ties the watch-list registry, quote
//! cache, viewer fanout and provider access together.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics;
use crate::provider::QuoteProvider;
use crate::publisher::{EventReceiver, Publisher};
use crate::quotes::{MarketStatus, Quote, QuoteCache, QuoteSource};
use crate::registry::{SessionId, SubscriptionAggregator, SubscriptionDiff};
use crate::symbol::Symbol;
use crate::viewer::{ViewerCommand, ViewerEvent};

/// Shared state behind every viewer session and background task
pub struct Multiplexer {
    aggregator: SubscriptionAggregator,
    cache: Arc<RwLock<QuoteCache>>,
    publisher: Arc<Publisher>,
    provider: Arc<dyn QuoteProvider>,
    market_status: RwLock<MarketStatus>,
}

impl Multiplexer {
    /// Create the multiplexer. Net subscription changes are queued on `diffs`
    /// for the upstream connection.
    pub fn new(
        config: &Config,
        provider: Arc<dyn QuoteProvider>,
        diffs: mpsc::UnboundedSender<SubscriptionDiff>,
    ) -> Self {
        let cache = Arc::new(RwLock::new(QuoteCache::new()));
        let publisher = Arc::new(Publisher::new(config.session_queue_capacity));

        Self {
            aggregator: SubscriptionAggregator::new(
                config.max_symbols_per_session,
                cache.clone(),
                publisher.clone(),
                diffs,
            ),
            cache,
            publisher,
            provider,
            market_status: RwLock::new(MarketStatus::unknown()),
        }
    }

    /// Register a viewer. The returned receiver yields every event for it,
    /// starting with its empty watch-list and the last known market status.
    pub async fn connect_session(&self) -> (SessionId, EventReceiver) {
        let session = self.aggregator.create_session().await;
        let events = self.publisher.register(session).await;

        self.publisher
            .send(session, ViewerEvent::Watchlist { tickers: Vec::new() })
            .await;
        let status = self.market_status.read().await.clone();
        self.publisher
            .send(session, ViewerEvent::MarketStatus(status))
            .await;

        metrics::LIVE_SESSIONS.inc();
        info!(session = %session, "Viewer connected");
        (session, events)
    }

    /// Drop a viewer and everything only it was watching
    pub async fn disconnect_session(&self, session: SessionId) -> BTreeSet<Symbol> {
        let removed = self.aggregator.destroy_session(session).await;
        self.publisher.unregister(session).await;

        metrics::LIVE_SESSIONS.dec();
        metrics::GLOBAL_SYMBOLS.sub(removed.len() as i64);
        info!(session = %session, unsubscribed = ?removed, "Viewer disconnected");
        removed
    }

    /// Handle one viewer command
    pub async fn handle_command(self: &Arc<Self>, session: SessionId, command: ViewerCommand) {
        match command {
            ViewerCommand::AddTicker { ticker } => self.add_ticker(session, &ticker).await,
            ViewerCommand::RemoveTicker { ticker } => self.remove_ticker(session, &ticker).await,
            ViewerCommand::RequestAllData => self.request_all_data(session).await,
        }
    }

    /// Add a ticker to a viewer's watch-list.
    ///
    /// The viewer gets the cached quote right away, then its watch-list; a
    /// fresh quote is fetched in the background.
    pub async fn add_ticker(self: &Arc<Self>, session: SessionId, raw: &str) {
        let result = match Symbol::parse(raw) {
            Ok(symbol) => self
                .aggregator
                .add_symbol(session, &symbol)
                .await
                .map(|added| (symbol, added)),
            Err(e) => Err(e),
        };

        let (symbol, added) = match result {
            Ok(ok) => ok,
            Err(e) => {
                debug!(session = %session, ticker = %raw, error = %e, "Rejected add_ticker");
                self.publisher.send(session, ViewerEvent::error(e.to_string())).await;
                return;
            }
        };
        metrics::GLOBAL_SYMBOLS.add(added.len() as i64);
        self.send_watchlist(session).await;

        let mux = Arc::clone(self);
        tokio::spawn(async move {
            mux.refresh_symbol(&symbol).await;
        });
    }

    /// Remove a ticker from a viewer's watch-list
    pub async fn remove_ticker(&self, session: SessionId, raw: &str) {
        let result = match Symbol::parse(raw) {
            Ok(symbol) => self.aggregator.remove_symbol(session, &symbol).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(dropped) => {
                if dropped {
                    metrics::GLOBAL_SYMBOLS.dec();
                }
                self.send_watchlist(session).await;
            }
            Err(e) => {
                debug!(session = %session, ticker = %raw, error = %e, "Rejected remove_ticker");
                self.publisher.send(session, ViewerEvent::error(e.to_string())).await;
            }
        }
    }

    /// Replay cached quotes for everything on a viewer's watch-list
    pub async fn request_all_data(&self, session: SessionId) {
        let Some(symbols) = self.aggregator.session_symbols(session).await else {
            return;
        };

        let quotes: Vec<Quote> = {
            let cache = self.cache.read().await;
            symbols
                .iter()
                .filter_map(|symbol| cache.get(symbol).cloned())
                .collect()
        };
        for quote in quotes {
            self.publisher.send(session, ViewerEvent::quote(quote)).await;
        }
    }

    /// Validate, cache and fan out a quote from either source.
    ///
    /// Returns true if the quote was cached and delivered.
    pub async fn ingest(&self, quote: Quote) -> bool {
        if !quote.is_valid() {
            metrics::DISCARDED_QUOTES.inc();
            debug!(symbol = %quote.symbol, "Discarding quote without bid or ask");
            return false;
        }

        match self.aggregator.accept_quote(quote).await {
            Some(_) => true,
            None => {
                metrics::DISCARDED_QUOTES.inc();
                false
            }
        }
    }

    /// Fetch one symbol from the provider and ingest it as a polled quote
    pub async fn refresh_symbol(&self, symbol: &Symbol) -> bool {
        match self.provider.fetch_latest_quote(symbol).await {
            Ok(Some(mut quote)) => {
                metrics::POLL_QUOTES.inc();
                quote.source = QuoteSource::Poll;
                quote.market_hours = self.market_status.read().await.is_open.into();
                self.ingest(quote).await
            }
            Ok(None) => {
                debug!(symbol = %symbol, "Provider has no quote");
                false
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Failed to fetch latest quote");
                false
            }
        }
    }

    /// Store the market status and send it to every viewer
    pub async fn publish_market_status(&self, status: MarketStatus) {
        *self.market_status.write().await = status.clone();
        let reached = self
            .publisher
            .broadcast(ViewerEvent::MarketStatus(status))
            .await;
        debug!(sessions = reached, "Broadcast market status");
    }

    /// Send one event to a single viewer
    pub async fn notify(&self, session: SessionId, event: ViewerEvent) -> bool {
        self.publisher.send(session, event).await
    }

    async fn send_watchlist(&self, session: SessionId) {
        let tickers = self
            .aggregator
            .session_symbols(session)
            .await
            .map(|symbols| symbols.into_iter().collect())
            .unwrap_or_default();
        self.publisher
            .send(session, ViewerEvent::Watchlist { tickers })
            .await;
    }

    pub fn provider(&self) -> &Arc<dyn QuoteProvider> {
        &self.provider
    }

    pub async fn market_status(&self) -> MarketStatus {
        self.market_status.read().await.clone()
    }

    /// Full global subscription set
    pub async fn snapshot(&self) -> BTreeSet<Symbol> {
        self.aggregator.snapshot().await
    }

    pub async fn cached_quote(&self, symbol: &Symbol) -> Option<Quote> {
        self.cache.read().await.get(symbol).cloned()
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn session_count(&self) -> usize {
        self.aggregator.session_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockQuoteProvider;
    use crate::quotes::test_support::quote;
    use rust_decimal_macros::dec;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn mux_with(
        provider: MockQuoteProvider,
    ) -> (Arc<Multiplexer>, mpsc::UnboundedReceiver<SubscriptionDiff>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Multiplexer::new(&Config::default(), Arc::new(provider), tx)),
            rx,
        )
    }

    fn quiet_provider() -> MockQuoteProvider {
        let mut provider = MockQuoteProvider::new();
        provider.expect_fetch_latest_quote().returning(|_| Ok(None));
        provider
    }

    fn drain(rx: &mut EventReceiver) -> Vec<ViewerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_connect_sends_watchlist_and_status() {
        let (mux, _diffs) = mux_with(quiet_provider());
        let (_, mut events) = mux.connect_session().await;

        let events = drain(&mut events);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ViewerEvent::Watchlist { tickers: vec![] });
        assert!(matches!(events[1], ViewerEvent::MarketStatus(_)));
    }

    #[tokio::test]
    async fn test_shared_add_serves_cached_quote_without_subscribe() {
        let (mux, mut diffs) = mux_with(quiet_provider());
        let (a, mut events_a) = mux.connect_session().await;
        let (b, mut events_b) = mux.connect_session().await;

        mux.add_ticker(a, "AAPL").await;
        assert_eq!(
            diffs.try_recv().unwrap(),
            SubscriptionDiff::added(BTreeSet::from([sym("AAPL")]))
        );
        assert!(mux.ingest(quote("AAPL", dec!(150), dec!(151), 0)).await);
        drain(&mut events_a);
        drain(&mut events_b);

        mux.add_ticker(b, "aapl").await;
        assert!(diffs.try_recv().is_err());

        let events = drain(&mut events_b);
        assert!(matches!(&events[0], ViewerEvent::Quote { data, .. } if data.symbol == sym("AAPL")));
        assert_eq!(
            events[1],
            ViewerEvent::Watchlist {
                tickers: vec![sym("AAPL")]
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_add_reports_error_to_originator_only() {
        let (mux, mut diffs) = mux_with(quiet_provider());
        let (a, mut events_a) = mux.connect_session().await;
        let (_, mut events_b) = mux.connect_session().await;
        drain(&mut events_a);
        drain(&mut events_b);

        mux.add_ticker(a, "WAYTOOLONG").await;

        assert!(matches!(drain(&mut events_a).as_slice(), [ViewerEvent::Error { .. }]));
        assert!(drain(&mut events_b).is_empty());
        assert!(diffs.try_recv().is_err());
        assert!(mux.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_fanout_only_to_interested_sessions() {
        let (mux, _diffs) = mux_with(quiet_provider());
        let (a, mut events_a) = mux.connect_session().await;
        let (b, mut events_b) = mux.connect_session().await;
        mux.add_ticker(a, "AAPL").await;
        mux.add_ticker(b, "MSFT").await;
        drain(&mut events_a);
        drain(&mut events_b);

        mux.ingest(quote("MSFT", dec!(400), dec!(401), 0)).await;

        assert!(drain(&mut events_a).is_empty());
        assert!(matches!(drain(&mut events_b).as_slice(), [ViewerEvent::Quote { .. }]));
    }

    #[tokio::test]
    async fn test_zero_quote_is_discarded() {
        let (mux, _diffs) = mux_with(quiet_provider());
        let (a, mut events) = mux.connect_session().await;
        mux.add_ticker(a, "AAPL").await;
        drain(&mut events);

        assert!(!mux.ingest(quote("AAPL", dec!(0), dec!(0), 0)).await);
        assert!(drain(&mut events).is_empty());
        assert!(mux.cached_quote(&sym("AAPL")).await.is_none());
    }

    #[tokio::test]
    async fn test_watchlist_scenario() {
        let (mux, mut diffs) = mux_with(quiet_provider());
        let (a, _events_a) = mux.connect_session().await;
        let (b, mut events_b) = mux.connect_session().await;

        // A adds AAPL: upstream subscribe
        mux.add_ticker(a, "AAPL").await;
        assert_eq!(
            diffs.try_recv().unwrap(),
            SubscriptionDiff::added(BTreeSet::from([sym("AAPL")]))
        );
        mux.ingest(quote("AAPL", dec!(150), dec!(151), 0)).await;

        // B adds AAPL: nothing upstream
        mux.add_ticker(b, "AAPL").await;
        assert!(diffs.try_recv().is_err());

        // A leaves: AAPL still held by B, cache kept
        assert!(mux.disconnect_session(a).await.is_empty());
        assert!(diffs.try_recv().is_err());
        assert!(mux.cached_quote(&sym("AAPL")).await.is_some());

        // B removes AAPL: unsubscribe and evict
        drain(&mut events_b);
        mux.remove_ticker(b, "AAPL").await;
        assert_eq!(
            diffs.try_recv().unwrap(),
            SubscriptionDiff::removed(BTreeSet::from([sym("AAPL")]))
        );
        assert!(mux.cached_quote(&sym("AAPL")).await.is_none());
        assert!(mux.snapshot().await.is_empty());
        assert_eq!(
            drain(&mut events_b),
            vec![ViewerEvent::Watchlist { tickers: vec![] }]
        );
    }

    #[tokio::test]
    async fn test_request_all_data_replays_cached_quotes() {
        let (mux, _diffs) = mux_with(quiet_provider());
        let (a, mut events) = mux.connect_session().await;
        mux.add_ticker(a, "AAPL").await;
        mux.add_ticker(a, "MSFT").await;
        mux.ingest(quote("AAPL", dec!(150), dec!(151), 0)).await;
        drain(&mut events);

        mux.request_all_data(a).await;

        let events = drain(&mut events);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ViewerEvent::Quote { data, .. } if data.symbol == sym("AAPL")));
    }

    #[tokio::test]
    async fn test_refresh_symbol_tags_poll_source() {
        let mut provider = MockQuoteProvider::new();
        provider
            .expect_fetch_latest_quote()
            .returning(|symbol| Ok(Some(quote(symbol.as_str(), dec!(10), dec!(11), 5))));
        let (mux, _diffs) = mux_with(provider);
        let (a, _events) = mux.connect_session().await;
        mux.add_ticker(a, "F").await;

        assert!(mux.refresh_symbol(&sym("F")).await);
        let cached = mux.cached_quote(&sym("F")).await.unwrap();
        assert_eq!(cached.source, QuoteSource::Poll);
        assert_eq!(cached.market_hours, crate::quotes::MarketHours::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_viewer_sees_quotes_in_cache_order() {
        let (mux, _diffs) = mux_with(quiet_provider());
        let (a, mut events) = mux.connect_session().await;
        mux.add_ticker(a, "AAPL").await;
        drain(&mut events);

        // Two sources racing with interleaved timestamps
        let mut tasks = Vec::new();
        for offset in 0..2 {
            let mux = mux.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..200 {
                    mux.ingest(quote("AAPL", dec!(150), dec!(151), i * 2 + offset))
                        .await;
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut last = None;
        for event in drain(&mut events) {
            if let ViewerEvent::Quote { data, .. } = event {
                if let Some(prev) = last {
                    assert!(data.timestamp >= prev, "viewer saw an older quote after a newer one");
                }
                last = Some(data.timestamp);
            }
        }
        assert_eq!(
            last,
            mux.cached_quote(&sym("AAPL")).await.map(|q| q.timestamp)
        );
    }
}
