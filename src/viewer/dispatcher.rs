//! Serial viewer command queue
//!
//! Every viewer socket pushes its parsed commands here; one task applies them
//! to the multiplexer in arrival order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ViewerCommand;
use crate::multiplexer::Multiplexer;
use crate::registry::SessionId;

/// Handle used by viewer sockets to enqueue commands
#[derive(Debug, Clone)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<(SessionId, ViewerCommand)>,
}

impl CommandQueue {
    /// Start the dispatcher task for a multiplexer
    pub fn spawn(mux: Arc<Multiplexer>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(mux, rx));
        Self { tx }
    }

    /// Enqueue a command; false if the dispatcher has stopped
    pub fn push(&self, session: SessionId, command: ViewerCommand) -> bool {
        if self.tx.send((session, command)).is_err() {
            warn!(session = %session, "Command dispatcher stopped");
            return false;
        }
        true
    }
}

async fn run_dispatcher(
    mux: Arc<Multiplexer>,
    mut rx: mpsc::UnboundedReceiver<(SessionId, ViewerCommand)>,
) {
    while let Some((session, command)) = rx.recv().await {
        debug!(session = %session, ?command, "Dispatching viewer command");
        mux.handle_command(session, command).await;
    }
    debug!("Command queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::provider::MockQuoteProvider;
    use crate::viewer::ViewerEvent;
    use std::time::Duration;

    #[tokio::test]
    async fn test_commands_apply_in_order() {
        let mut provider = MockQuoteProvider::new();
        provider.expect_fetch_latest_quote().returning(|_| Ok(None));
        let (tx, _diffs) = mpsc::unbounded_channel();
        let mux = Arc::new(Multiplexer::new(&Config::default(), Arc::new(provider), tx));
        let queue = CommandQueue::spawn(mux.clone());

        let (session, mut events) = mux.connect_session().await;
        for ticker in ["AAPL", "MSFT"] {
            assert!(queue.push(
                session,
                ViewerCommand::AddTicker {
                    ticker: ticker.to_string()
                }
            ));
        }
        queue.push(
            session,
            ViewerCommand::RemoveTicker {
                ticker: "AAPL".to_string(),
            },
        );

        // connect, add, add, remove
        let mut watchlists = Vec::new();
        while watchlists.len() < 4 {
            match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Some(ViewerEvent::Watchlist { tickers })) => watchlists.push(tickers),
                Ok(Some(_)) => {}
                _ => panic!("Dispatcher did not answer every command"),
            }
        }

        let lengths: Vec<usize> = watchlists.iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![0, 1, 2, 1]);
        assert_eq!(watchlists[3][0].as_str(), "MSFT");
    }
}
