//! Ticker symbol normalization and validation

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Longest ticker accepted from viewers and the provider
pub const MAX_SYMBOL_LEN: usize = 5;

/// Canonical ticker: 1-5 uppercase ASCII letters or digits
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Normalize and validate a raw ticker string.
    ///
    /// Surrounding whitespace is trimmed and letters are uppercased before
    /// the format checks run.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized = raw.trim().to_ascii_uppercase();

        if normalized.is_empty() {
            return Err(ValidationError::Empty);
        }
        if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidCharacters(normalized));
        }
        if normalized.len() > MAX_SYMBOL_LEN {
            return Err(ValidationError::TooLong(normalized));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
