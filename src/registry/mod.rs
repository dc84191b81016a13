//! Watch-list registry module
//!
//! Tracks which viewer session watches which symbols and derives the global
//! subscription set the upstream connection must follow.

mod aggregator;
mod watchlist;

pub use aggregator::{SubscriptionAggregator, SubscriptionDiff};
pub use watchlist::WatchlistRegistry;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of one connected viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
