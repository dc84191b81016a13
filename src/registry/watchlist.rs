//! Per-session watch-lists with a maintained reverse index

use std::collections::{BTreeSet, HashMap, HashSet};

use super::SessionId;
use crate::error::ValidationError;
use crate::symbol::Symbol;

/// Session watch-lists plus the symbol -> sessions reverse index.
///
/// The key set of `watchers` is the global subscription set: a symbol has an
/// entry exactly while at least one session watches it.
#[derive(Debug)]
pub struct WatchlistRegistry {
    sessions: HashMap<SessionId, HashSet<Symbol>>,
    watchers: HashMap<Symbol, HashSet<SessionId>>,
    max_symbols: usize,
}

impl WatchlistRegistry {
    /// Create a registry with the given per-session symbol cap
    pub fn new(max_symbols: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            watchers: HashMap::new(),
            max_symbols,
        }
    }

    /// Register an empty watch-list
    pub fn create_session(&mut self) -> SessionId {
        let id = SessionId::new();
        self.sessions.insert(id, HashSet::new());
        id
    }

    /// Add a raw ticker to a session.
    ///
    /// Returns the symbols that became globally subscribed (empty when some
    /// other session already watched it).
    pub fn add_symbol(
        &mut self,
        session: SessionId,
        raw: &str,
    ) -> Result<BTreeSet<Symbol>, ValidationError> {
        let symbol = Symbol::parse(raw)?;
        self.insert_symbol(session, symbol)
    }

    /// Add an already normalized symbol to a session
    pub fn insert_symbol(
        &mut self,
        session: SessionId,
        symbol: Symbol,
    ) -> Result<BTreeSet<Symbol>, ValidationError> {
        let symbols = self
            .sessions
            .get_mut(&session)
            .ok_or(ValidationError::UnknownSession)?;

        if symbols.contains(&symbol) {
            return Err(ValidationError::Duplicate(symbol.to_string()));
        }
        if symbols.len() >= self.max_symbols {
            return Err(ValidationError::LimitReached(self.max_symbols));
        }

        symbols.insert(symbol.clone());

        let watchers = self.watchers.entry(symbol.clone()).or_default();
        let newly_global = watchers.is_empty();
        watchers.insert(session);

        let mut added = BTreeSet::new();
        if newly_global {
            added.insert(symbol);
        }
        Ok(added)
    }

    /// Remove a symbol from a session.
    ///
    /// Returns true if the symbol left the global set. Removing a symbol the
    /// session does not hold is a no-op.
    pub fn remove_symbol(
        &mut self,
        session: SessionId,
        symbol: &Symbol,
    ) -> Result<bool, ValidationError> {
        let symbols = self
            .sessions
            .get_mut(&session)
            .ok_or(ValidationError::UnknownSession)?;

        if !symbols.remove(symbol) {
            return Ok(false);
        }

        Ok(self.unwatch(session, symbol))
    }

    /// Drop a session and return the symbols only it was watching
    pub fn destroy_session(&mut self, session: SessionId) -> BTreeSet<Symbol> {
        let Some(symbols) = self.sessions.remove(&session) else {
            return BTreeSet::new();
        };

        symbols
            .into_iter()
            .filter(|symbol| self.unwatch(session, symbol))
            .collect()
    }

    /// Detach a session from a symbol's watchers; true if nobody is left
    fn unwatch(&mut self, session: SessionId, symbol: &Symbol) -> bool {
        match self.watchers.get_mut(symbol) {
            Some(watchers) => {
                watchers.remove(&session);
                if watchers.is_empty() {
                    self.watchers.remove(symbol);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Current global subscription set
    pub fn snapshot(&self) -> BTreeSet<Symbol> {
        self.watchers.keys().cloned().collect()
    }

    /// Sessions watching a symbol
    pub fn sessions_for(&self, symbol: &Symbol) -> Vec<SessionId> {
        self.watchers
            .get(symbol)
            .map(|sessions| sessions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Symbols on a session's watch-list, sorted
    pub fn session_symbols(&self, session: SessionId) -> Option<BTreeSet<Symbol>> {
        self.sessions
            .get(&session)
            .map(|symbols| symbols.iter().cloned().collect())
    }

    pub fn is_watched(&self, symbol: &Symbol) -> bool {
        self.watchers.contains_key(symbol)
    }

    pub fn has_session(&self, session: SessionId) -> bool {
        self.sessions.contains_key(&session)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
pub(crate) fn assert_consistent(registry: &WatchlistRegistry) {
    let union: BTreeSet<Symbol> = registry.sessions.values().flatten().cloned().collect();
    assert_eq!(registry.snapshot(), union, "global set must equal union of sessions");

    for (symbol, watchers) in &registry.watchers {
        assert!(!watchers.is_empty(), "{symbol} kept with no watchers");
        for session in watchers {
            assert!(registry.sessions[session].contains(symbol));
        }
    }
    for (session, symbols) in &registry.sessions {
        for symbol in symbols {
            assert!(registry.watchers[symbol].contains(session));
        }
    }
}
