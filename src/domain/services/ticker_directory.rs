//! Known-symbol directory
//!
//! Spoken trade orders reference companies by name at least as often as by
//! symbol, so resolution accepts both "AAPL" and "apple". Only symbols in
//! the directory are tradable; anything else is an unresolvable ticker.

use crate::domain::value_objects::ticker::Ticker;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

static KNOWN_TICKERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "AAPL", "MSFT", "GOOGL", "GOOG", "AMZN", "TSLA", "META", "NVDA", "NFLX", "DIS", "AMD",
        "INTC", "BA", "JPM", "KO", "WMT", "V", "PFE", "XOM", "T",
    ]
    .into_iter()
    .collect()
});

static SPOKEN_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("apple", "AAPL"),
        ("microsoft", "MSFT"),
        ("google", "GOOGL"),
        ("alphabet", "GOOGL"),
        ("amazon", "AMZN"),
        ("tesla", "TSLA"),
        ("meta", "META"),
        ("facebook", "META"),
        ("nvidia", "NVDA"),
        ("netflix", "NFLX"),
        ("disney", "DIS"),
        ("intel", "INTC"),
        ("boeing", "BA"),
        ("walmart", "WMT"),
        ("visa", "V"),
        ("pfizer", "PFE"),
        ("exxon", "XOM"),
        ("coca cola", "KO"),
        ("coke", "KO"),
    ]
    .into_iter()
    .collect()
});

/// Whether a symbol is in the tradable directory.
pub fn is_known(symbol: &str) -> bool {
    KNOWN_TICKERS.contains(symbol)
}

/// Resolve raw heard text ("AAPL", "apple", "Apple,") to a known ticker.
/// Returns `None` for well-formed but unknown symbols and for anything
/// unparseable.
pub fn resolve(raw: &str) -> Option<Ticker> {
    let cleaned = raw.trim().trim_matches(|c: char| ",.!?".contains(c));
    if cleaned.is_empty() {
        return None;
    }

    if let Some(symbol) = SPOKEN_ALIASES.get(cleaned.to_lowercase().as_str()) {
        return Ticker::new(symbol).ok();
    }

    match Ticker::new(cleaned) {
        Ok(ticker) if is_known(ticker.as_str()) => Some(ticker),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_exact_symbol() {
        assert_eq!(resolve("AAPL").unwrap().as_str(), "AAPL");
        assert_eq!(resolve("tsla").unwrap().as_str(), "TSLA");
    }

    #[test]
    fn test_resolve_spoken_alias() {
        assert_eq!(resolve("apple").unwrap().as_str(), "AAPL");
        assert_eq!(resolve("Facebook").unwrap().as_str(), "META");
        assert_eq!(resolve("coca cola").unwrap().as_str(), "KO");
    }

    #[test]
    fn test_resolve_strips_punctuation() {
        assert_eq!(resolve("apple,").unwrap().as_str(), "AAPL");
        assert_eq!(resolve("NVDA!").unwrap().as_str(), "NVDA");
    }

    #[test]
    fn test_resolve_unknown_symbol() {
        assert!(resolve("ZZZZ").is_none());
        assert!(resolve("").is_none());
        assert!(resolve("not a ticker").is_none());
    }

    #[test]
    fn test_is_known() {
        assert!(is_known("MSFT"));
        assert!(!is_known("msft")); // directory stores uppercase
        assert!(!is_known("ZZZZ"));
    }
}
