//! Subscription aggregator
//!
//! Serializes every watch-list mutation behind one mutex and turns the net
//! change of the global set into diffs for the upstream connection.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

use super::{SessionId, WatchlistRegistry};
use crate::error::ValidationError;
use crate::publisher::Publisher;
use crate::quotes::{Quote, QuoteCache};
use crate::symbol::Symbol;
use crate::viewer::ViewerEvent;

/// Net change of the global subscription set caused by one mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    pub added: BTreeSet<Symbol>,
    pub removed: BTreeSet<Symbol>,
}

impl SubscriptionDiff {
    pub fn added(added: BTreeSet<Symbol>) -> Self {
        Self {
            added,
            removed: BTreeSet::new(),
        }
    }

    pub fn removed(removed: BTreeSet<Symbol>) -> Self {
        Self {
            added: BTreeSet::new(),
            removed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Owner of the watch-list registry.
///
/// Lock order is registry, then cache, then the publisher's outboxes. Cache
/// eviction, diff emission and quote delivery all happen inside the registry
/// critical section, so the upstream sees diffs in mutation order, the cache
/// never outlives a symbol's last watcher, and viewers receive quotes in the
/// order the cache accepted them.
pub struct SubscriptionAggregator {
    registry: Mutex<WatchlistRegistry>,
    cache: Arc<RwLock<QuoteCache>>,
    publisher: Arc<Publisher>,
    diffs: mpsc::UnboundedSender<SubscriptionDiff>,
}

impl SubscriptionAggregator {
    pub fn new(
        max_symbols: usize,
        cache: Arc<RwLock<QuoteCache>>,
        publisher: Arc<Publisher>,
        diffs: mpsc::UnboundedSender<SubscriptionDiff>,
    ) -> Self {
        Self {
            registry: Mutex::new(WatchlistRegistry::new(max_symbols)),
            cache,
            publisher,
            diffs,
        }
    }

    pub async fn create_session(&self) -> SessionId {
        self.registry.lock().await.create_session()
    }

    /// Add a symbol to a session; returns symbols newly added to the global set.
    ///
    /// A cached quote for the symbol is queued to the session before the lock
    /// is released.
    pub async fn add_symbol(
        &self,
        session: SessionId,
        symbol: &Symbol,
    ) -> Result<BTreeSet<Symbol>, ValidationError> {
        let mut registry = self.registry.lock().await;
        let added = registry.insert_symbol(session, symbol.clone())?;

        if !added.is_empty() {
            debug!(session = %session, symbols = ?added, "Symbols joined global subscription");
            self.emit(SubscriptionDiff::added(added.clone()));
        }

        let cached = self.cache.read().await.get(symbol).cloned();
        if let Some(quote) = cached {
            self.publisher.send(session, ViewerEvent::quote(quote)).await;
        }
        Ok(added)
    }

    /// Remove a ticker from a session; returns whether it left the global set
    pub async fn remove_symbol(
        &self,
        session: SessionId,
        symbol: &Symbol,
    ) -> Result<bool, ValidationError> {
        let mut registry = self.registry.lock().await;
        let dropped = registry.remove_symbol(session, symbol)?;

        if dropped {
            self.cache.write().await.evict(symbol);
            debug!(session = %session, symbol = %symbol, "Symbol left global subscription");
            self.emit(SubscriptionDiff::removed(BTreeSet::from([symbol.clone()])));
        }
        Ok(dropped)
    }

    /// Drop a session; returns the symbols that left the global set
    pub async fn destroy_session(&self, session: SessionId) -> BTreeSet<Symbol> {
        let mut registry = self.registry.lock().await;
        let removed = registry.destroy_session(session);

        if !removed.is_empty() {
            let mut cache = self.cache.write().await;
            for symbol in &removed {
                cache.evict(symbol);
            }
            drop(cache);
            debug!(session = %session, symbols = ?removed, "Session symbols left global subscription");
            self.emit(SubscriptionDiff::removed(removed.clone()));
        }
        removed
    }

    /// Full global subscription set
    pub async fn snapshot(&self) -> BTreeSet<Symbol> {
        self.registry.lock().await.snapshot()
    }

    pub async fn session_symbols(&self, session: SessionId) -> Option<BTreeSet<Symbol>> {
        self.registry.lock().await.session_symbols(session)
    }

    pub async fn session_count(&self) -> usize {
        self.registry.lock().await.session_count()
    }

    /// Cache a quote and deliver it to every session watching its symbol.
    ///
    /// Returns the number of sessions reached. Quotes for symbols nobody
    /// watches, invalid quotes and quotes older than the cached entry yield
    /// `None`.
    pub async fn accept_quote(&self, quote: Quote) -> Option<usize> {
        let registry = self.registry.lock().await;
        let sessions = registry.sessions_for(&quote.symbol);
        if sessions.is_empty() {
            return None;
        }

        if !self.cache.write().await.update(quote.clone()) {
            return None;
        }
        Some(self.publisher.fanout(&quote, &sessions).await)
    }

    fn emit(&self, diff: SubscriptionDiff) {
        if self.diffs.send(diff).is_err() {
            warn!("Upstream command queue closed, dropping subscription diff");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::test_support::quote;
    use rust_decimal_macros::dec;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn aggregator() -> (
        SubscriptionAggregator,
        Arc<RwLock<QuoteCache>>,
        mpsc::UnboundedReceiver<SubscriptionDiff>,
    ) {
        let cache = Arc::new(RwLock::new(QuoteCache::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = Arc::new(Publisher::default());
        (SubscriptionAggregator::new(30, cache.clone(), publisher, tx), cache, rx)
    }

    #[tokio::test]
    async fn test_shared_add_emits_single_diff() {
        let (agg, _, mut diffs) = aggregator();
        let a = agg.create_session().await;
        let b = agg.create_session().await;

        agg.add_symbol(a, &sym("AAPL")).await.unwrap();
        agg.add_symbol(b, &sym("AAPL")).await.unwrap();

        assert_eq!(
            diffs.try_recv().unwrap(),
            SubscriptionDiff::added(BTreeSet::from([sym("AAPL")]))
        );
        assert!(diffs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_validation_error_emits_nothing() {
        let (agg, _, mut diffs) = aggregator();
        let a = agg.create_session().await;

        assert!(agg.add_symbol(a, &sym("AAPL")).await.is_ok());
        let _ = diffs.try_recv();

        assert_eq!(
            agg.add_symbol(a, &sym("AAPL")).await,
            Err(ValidationError::Duplicate("AAPL".to_string()))
        );
        assert_eq!(
            agg.add_symbol(SessionId::new(), &sym("MSFT")).await,
            Err(ValidationError::UnknownSession)
        );
        assert!(diffs.try_recv().is_err());
        assert_eq!(agg.snapshot().await, BTreeSet::from([sym("AAPL")]));
    }

    #[tokio::test]
    async fn test_remove_evicts_only_when_last_watcher_leaves() {
        let (agg, cache, mut diffs) = aggregator();
        let a = agg.create_session().await;
        let b = agg.create_session().await;
        agg.add_symbol(a, &sym("AAPL")).await.unwrap();
        agg.add_symbol(b, &sym("AAPL")).await.unwrap();
        let _ = diffs.try_recv();

        assert!(agg.accept_quote(quote("AAPL", dec!(150), dec!(151), 0)).await.is_some());

        assert!(!agg.remove_symbol(a, &sym("AAPL")).await.unwrap());
        assert!(diffs.try_recv().is_err());
        assert!(cache.read().await.contains(&sym("AAPL")));

        assert!(agg.remove_symbol(b, &sym("AAPL")).await.unwrap());
        assert_eq!(
            diffs.try_recv().unwrap(),
            SubscriptionDiff::removed(BTreeSet::from([sym("AAPL")]))
        );
        assert!(cache.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_session_evicts_unique_symbols() {
        let (agg, cache, mut diffs) = aggregator();
        let a = agg.create_session().await;
        let b = agg.create_session().await;
        agg.add_symbol(a, &sym("AAPL")).await.unwrap();
        agg.add_symbol(a, &sym("MSFT")).await.unwrap();
        agg.add_symbol(b, &sym("AAPL")).await.unwrap();
        while diffs.try_recv().is_ok() {}

        agg.accept_quote(quote("AAPL", dec!(150), dec!(151), 0)).await;
        agg.accept_quote(quote("MSFT", dec!(400), dec!(401), 0)).await;

        let removed = agg.destroy_session(a).await;
        assert_eq!(removed, BTreeSet::from([sym("MSFT")]));
        assert_eq!(
            diffs.try_recv().unwrap(),
            SubscriptionDiff::removed(BTreeSet::from([sym("MSFT")]))
        );

        let cache = cache.read().await;
        assert!(cache.contains(&sym("AAPL")));
        assert!(!cache.contains(&sym("MSFT")));
    }

    #[test]
    fn test_stale_quote_is_not_delivered() {
        let (agg, cache, _diffs) = aggregator();
        tokio_test::block_on(async {
            let a = agg.create_session().await;
            agg.add_symbol(a, &sym("AAPL")).await.unwrap();

            assert!(agg.accept_quote(quote("AAPL", dec!(150), dec!(151), 10)).await.is_some());
            assert!(agg.accept_quote(quote("AAPL", dec!(149), dec!(150), 5)).await.is_none());

            let cache = cache.read().await;
            assert_eq!(cache.get(&sym("AAPL")).unwrap().bid_price, dec!(150));
        });
    }

    #[tokio::test]
    async fn test_accept_quote_for_unwatched_symbol_is_dropped() {
        let (agg, cache, _diffs) = aggregator();
        assert!(agg.accept_quote(quote("AAPL", dec!(150), dec!(151), 0)).await.is_none());
        assert!(cache.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_adds_subscribe_once() {
        let (agg, _, mut diffs) = aggregator();
        let agg = Arc::new(agg);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let agg = agg.clone();
            handles.push(tokio::spawn(async move {
                let session = agg.create_session().await;
                agg.add_symbol(session, &sym("NVDA")).await.unwrap()
            }));
        }

        let mut newly_global = 0;
        for handle in handles {
            newly_global += handle.await.unwrap().len();
        }

        assert_eq!(newly_global, 1);
        assert!(diffs.try_recv().is_ok());
        assert!(diffs.try_recv().is_err());
    }
}
