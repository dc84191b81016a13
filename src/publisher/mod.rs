//! Publisher module for viewer fanout
//!
//! Holds one bounded outbound queue per viewer session and delivers events to
//! the sessions the caller resolved from the reverse index. A session whose
//! queue is full misses events until its socket catches up.

use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::metrics;
use crate::quotes::Quote;
use crate::registry::SessionId;
use crate::viewer::ViewerEvent;

/// Outbound queue depth per session unless configured otherwise
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Receiving half of a session's outbound queue
pub type EventReceiver = mpsc::Receiver<ViewerEvent>;

/// Per-session outbound queues
#[derive(Debug)]
pub struct Publisher {
    outboxes: RwLock<HashMap<SessionId, mpsc::Sender<ViewerEvent>>>,
    capacity: usize,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Publisher {
    /// Create a publisher whose session queues hold `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            outboxes: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Open the outbound queue for a session
    pub async fn register(&self, session: SessionId) -> EventReceiver {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.outboxes.write().await.insert(session, tx);
        rx
    }

    /// Close the outbound queue for a session
    pub async fn unregister(&self, session: SessionId) {
        self.outboxes.write().await.remove(&session);
    }

    /// Send an event to one session
    pub async fn send(&self, session: SessionId, event: ViewerEvent) -> bool {
        let outboxes = self.outboxes.read().await;
        match outboxes.get(&session) {
            Some(tx) => offer(session, tx, event),
            None => false,
        }
    }

    /// Deliver a quote to the given sessions.
    ///
    /// Returns the number of sessions the quote reached.
    pub async fn fanout(&self, quote: &Quote, sessions: &[SessionId]) -> usize {
        let outboxes = self.outboxes.read().await;
        let event = ViewerEvent::quote(quote.clone());

        let delivered = sessions
            .iter()
            .filter_map(|session| outboxes.get(session).map(|tx| (*session, tx)))
            .filter(|(session, tx)| offer(*session, tx, event.clone()))
            .count();

        metrics::FANOUT_DELIVERIES.inc_by(delivered as u64);
        debug!(
            symbol = %quote.symbol,
            source = ?quote.source,
            delivered,
            "Fanned out quote"
        );
        delivered
    }

    /// Send an event to every session
    pub async fn broadcast(&self, event: ViewerEvent) -> usize {
        let outboxes = self.outboxes.read().await;
        outboxes
            .iter()
            .filter(|(session, tx)| offer(**session, tx, event.clone()))
            .count()
    }
}

/// Queue an event without waiting; a full or closed queue drops it
fn offer(session: SessionId, tx: &mpsc::Sender<ViewerEvent>, event: ViewerEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            metrics::DROPPED_EVENTS.inc();
            warn!(session = %session, "Viewer queue full, dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::test_support::quote;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_fanout_reaches_only_listed_sessions() {
        let publisher = Publisher::default();
        let a = SessionId::new();
        let b = SessionId::new();
        let mut rx_a = publisher.register(a).await;
        let mut rx_b = publisher.register(b).await;

        let delivered = publisher
            .fanout(&quote("AAPL", dec!(150), dec!(151), 0), &[a])
            .await;

        assert_eq!(delivered, 1);
        assert!(matches!(rx_a.try_recv(), Ok(ViewerEvent::Quote { .. })));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_session_is_skipped() {
        let publisher = Publisher::default();
        let a = SessionId::new();
        let b = SessionId::new();
        let rx_a = publisher.register(a).await;
        let mut rx_b = publisher.register(b).await;
        drop(rx_a);

        let delivered = publisher
            .fanout(&quote("AAPL", dec!(150), dec!(151), 0), &[a, b])
            .await;
        assert_eq!(delivered, 1);
        assert!(rx_b.try_recv().is_ok());

        publisher.unregister(b).await;
        assert!(!publisher.send(b, ViewerEvent::error("gone")).await);
    }

    #[tokio::test]
    async fn test_broadcast() {
        let publisher = Publisher::default();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            receivers.push(publisher.register(SessionId::new()).await);
        }

        let event = ViewerEvent::error("maintenance");
        assert_eq!(publisher.broadcast(event.clone()).await, 3);
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), event);
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_until_drained() {
        let publisher = Publisher::new(2);
        let a = SessionId::new();
        let mut rx = publisher.register(a).await;
        let before = metrics::DROPPED_EVENTS.get();

        for secs in 0..3 {
            publisher
                .fanout(&quote("AAPL", dec!(150), dec!(151), secs), &[a])
                .await;
        }
        assert!(metrics::DROPPED_EVENTS.get() > before);

        let mut received = Vec::new();
        while let Ok(ViewerEvent::Quote { data, .. }) = rx.try_recv() {
            received.push(data.timestamp);
        }
        assert_eq!(received.len(), 2);

        let delivered = publisher
            .fanout(&quote("AAPL", dec!(150), dec!(151), 3), &[a])
            .await;
        assert_eq!(delivered, 1);
    }
}
