//! Last-known-quote cache
//!
//! Keeps the latest valid quote per symbol regardless of which source produced it.

use std::collections::HashMap;

use super::Quote;
use crate::symbol::Symbol;

/// Latest quote for every watched symbol
#[derive(Debug, Default)]
pub struct QuoteCache {
    quotes: HashMap<Symbol, Quote>,
}

impl QuoteCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            quotes: HashMap::new(),
        }
    }

    /// Store a quote.
    ///
    /// Returns true if the quote replaced the cached entry. Invalid quotes and
    /// quotes older than the cached one are rejected.
    pub fn update(&mut self, quote: Quote) -> bool {
        if !quote.is_valid() {
            return false;
        }

        if let Some(existing) = self.quotes.get(&quote.symbol) {
            if quote.timestamp < existing.timestamp {
                return false;
            }
        }

        self.quotes.insert(quote.symbol.clone(), quote);
        true
    }

    /// Drop the entry for a symbol nobody watches anymore
    pub fn evict(&mut self, symbol: &Symbol) -> Option<Quote> {
        self.quotes.remove(symbol)
    }

    /// Get the cached quote for a symbol
    pub fn get(&self, symbol: &Symbol) -> Option<&Quote> {
        self.quotes.get(symbol)
    }

    /// Check if a symbol has a cached quote
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.quotes.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}
