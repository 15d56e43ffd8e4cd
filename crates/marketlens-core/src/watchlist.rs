// Watchlists and ticker symbol rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on symbols per quote request and per watchlist.
pub const MAX_SYMBOLS: usize = 50;

/// Longest accepted ticker, e.g. `BRK-B`, `^GSPC`, `EURUSD=X`.
pub const MAX_SYMBOL_LEN: usize = 15;

pub const MAX_WATCHLIST_NAME_LEN: usize = 100;

/// A user-defined named list of ticker symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watchlist {
    pub id: i64,
    #[serde(skip_serializing, default)]
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub symbols: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("symbols must not be empty")]
    Empty,
    #[error("too many symbols: {count} (maximum {MAX_SYMBOLS})")]
    TooMany { count: usize },
    #[error("invalid symbol `{0}`")]
    Invalid(String),
}

/// Trim and upper-case a ticker, rejecting anything outside
/// `A-Z 0-9 . - ^ =` or longer than [`MAX_SYMBOL_LEN`].
pub fn normalize_symbol(raw: &str) -> Result<String, SymbolError> {
    let symbol = raw.trim().to_ascii_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    if valid {
        Ok(symbol)
    } else {
        Err(SymbolError::Invalid(raw.to_string()))
    }
}

/// Normalize a symbol list for an upstream call: at least one and at most
/// [`MAX_SYMBOLS`] entries, each normalized, duplicates dropped (first
/// occurrence wins).
///
/// The size cap applies to the list as submitted, before de-duplication.
pub fn normalize_symbols<S: AsRef<str>>(raw: &[S]) -> Result<Vec<String>, SymbolError> {
    if raw.is_empty() {
        return Err(SymbolError::Empty);
    }
    if raw.len() > MAX_SYMBOLS {
        return Err(SymbolError::TooMany { count: raw.len() });
    }
    normalize_symbol_set(raw)
}

/// Like [`normalize_symbols`] but an empty list is allowed (a watchlist may
/// start out empty).
pub fn normalize_watchlist_symbols<S: AsRef<str>>(raw: &[S]) -> Result<Vec<String>, SymbolError> {
    if raw.len() > MAX_SYMBOLS {
        return Err(SymbolError::TooMany { count: raw.len() });
    }
    normalize_symbol_set(raw)
}

fn normalize_symbol_set<S: AsRef<str>>(raw: &[S]) -> Result<Vec<String>, SymbolError> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for s in raw {
        let symbol = normalize_symbol(s.as_ref())?;
        if !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    Ok(out)
}

/// Trimmed watchlist name, or `None` if it is empty or too long.
pub fn normalize_watchlist_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_WATCHLIST_NAME_LEN {
        None
    } else {
        Some(name.to_string())
    }
}
