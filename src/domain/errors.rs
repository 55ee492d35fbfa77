use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Business-rule rejections. These are reported to the caller or spoken back
/// into the call, never retried, and never change stored state.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TradeRejection {
    #[error("Insufficient funds: required {required:.2}, available {available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Insufficient shares: requested {requested}, held {held}")]
    InsufficientShares { requested: i64, held: i64 },

    #[error("Unknown ticker symbol: {ticker}")]
    UnresolvableTicker { ticker: String },

    #[error("Invalid quantity: {detail}")]
    InvalidQuantity { detail: String },

    #[error("No quote available for {ticker}")]
    QuoteUnavailable { ticker: String },
}

/// Outcome of a trade execution attempt that did not produce a trade.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Expected business-rule failure; account state untouched.
    #[error(transparent)]
    Rejected(#[from] TradeRejection),

    /// Persistence or infrastructure fault; account state untouched
    /// (the transaction never committed).
    #[error("Execution failed: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for ExecutionError {
    fn from(e: sqlx::Error) -> Self {
        ExecutionError::Internal(e.to_string())
    }
}

/// Market data failures surfaced after the retry budget is exhausted.
#[derive(Debug, Error, Clone)]
pub enum MarketDataError {
    #[error("Upstream fetch failed for {ticker}: {detail}")]
    FetchFailed { ticker: String, detail: String },

    #[error("Ticker not found upstream: {0}")]
    UnknownTicker(String),
}

/// Errors from the raw quote feed. Everything except `NotFound` is
/// considered transient and retryable.
#[derive(Debug, Error, Clone)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("Request timed out")]
    Timeout,

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Symbol not found: {0}")]
    NotFound(String),
}

impl FeedError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, FeedError::NotFound(_))
    }
}

/// Errors from the language model boundary.
#[derive(Debug, Error, Clone)]
pub enum ModelError {
    #[error("Model call failed: {0}")]
    CallFailed(String),

    #[error("Model returned malformed output: {0}")]
    Malformed(String),

    #[error("Model not configured")]
    NotConfigured,
}

/// Errors from the telephony provider boundary.
#[derive(Debug, Error)]
pub enum TelephonyError {
    #[error("Call placement failed: {0}")]
    PlacementFailed(String),

    #[error("Provider rejected request: {0}")]
    Rejected(String),

    #[error("Telephony provider not configured")]
    NotConfigured,
}

/// Call orchestration failures.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("Call session not found: {0}")]
    SessionNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("No session actor for call: {0}")]
    ActorNotRunning(String),

    #[error("No response received from session actor")]
    NoResponse,

    #[error("Channel send error: {0}")]
    ChannelSendError(String),

    #[error(transparent)]
    Telephony(#[from] TelephonyError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl<T> From<mpsc::error::SendError<T>> for CallError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        CallError::ChannelSendError(e.to_string())
    }
}

impl From<sqlx::Error> for CallError {
    fn from(e: sqlx::Error) -> Self {
        CallError::Database(e.to_string())
    }
}

/// Validation failures on value objects.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid share quantity: {0}")]
    InvalidShares(String),

    #[error("Invalid ticker symbol: {0}")]
    InvalidTicker(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Invalid call time: {0}")]
    InvalidCallTime(String),
}

impl From<ValidationError> for String {
    fn from(error: ValidationError) -> Self {
        error.to_string()
    }
}
