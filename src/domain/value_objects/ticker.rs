use crate::domain::errors::ValidationError;
use serde::{Deserialize, Serialize};

/// A well-formed stock ticker symbol: 1-5 ASCII letters, stored uppercase.
///
/// Well-formed does not mean tradable; resolution against the known-symbol
/// directory happens in `ticker_directory`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        let symbol = raw.trim();
        if symbol.is_empty() || symbol.len() > 5 {
            return Err(ValidationError::InvalidTicker(format!(
                "'{}' (must be 1-5 characters)",
                raw
            )));
        }
        if !symbol.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidTicker(format!(
                "'{}' (letters only)",
                raw
            )));
        }
        Ok(Ticker(symbol.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
