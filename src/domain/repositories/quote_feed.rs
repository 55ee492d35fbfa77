use crate::domain::errors::FeedError;
use async_trait::async_trait;

/// A point-in-time snapshot of a market index (S&P 500, Dow, Nasdaq).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
}

/// Upstream market data source. Implementations are expected to fail: the
/// cache layer owns retries, backoff, and stale fallback. Errors other than
/// `NotFound` are treated as transient.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    fn name(&self) -> &str;

    /// Latest price for a single ticker.
    async fn fetch_price(&self, ticker: &str) -> Result<f64, FeedError>;

    /// Latest snapshot for an index symbol (e.g. "^GSPC").
    async fn fetch_index(&self, symbol: &str) -> Result<IndexSnapshot, FeedError>;
}
