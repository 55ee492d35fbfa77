//! Market Data Cache & Refresh Service
//!
//! Sits between the rest of the system and a rate-limited, failure-prone
//! upstream feed. Three defenses, in order:
//! - a TTL cache, so repeated reads inside the staleness window cost nothing;
//! - single-flight coalescing, so concurrent misses for one ticker issue
//!   exactly one upstream fetch;
//! - bounded retries with exponential backoff, falling back to the last
//!   expired value (tagged `stale_fallback`) when the upstream stays down.

use crate::config::MarketDataConfig;
use crate::domain::errors::{FeedError, MarketDataError};
use crate::domain::repositories::quote_feed::{IndexSnapshot, QuoteFeed};
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Quote cache capacity; expired entries are kept around as fallbacks
const QUOTE_CACHE_CAPACITY: usize = 256;

/// Index symbols aggregated into the market summary
const SP500_SYMBOL: &str = "^GSPC";
const DOW_SYMBOL: &str = "^DJI";
const NASDAQ_SYMBOL: &str = "^IXIC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    AllowCached,
    ForceFresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Live,
    StaleFallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketQuote {
    pub ticker: String,
    pub price: f64,
    pub source: QuoteSource,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexQuote {
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
}

impl IndexQuote {
    /// Rendering used in broker speech and prompt context.
    pub fn speakable(&self) -> String {
        format!("{:.2} ({:+.2}%)", self.price, self.change_percent)
    }
}

impl From<IndexSnapshot> for IndexQuote {
    fn from(s: IndexSnapshot) -> Self {
        IndexQuote {
            price: s.price,
            change: s.change,
            change_percent: s.change_percent,
        }
    }
}

/// Index-level aggregate, cached under its own key with the same
/// retry/fallback contract as single quotes.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSummary {
    pub sp500: Option<IndexQuote>,
    pub dow: Option<IndexQuote>,
    pub nasdaq: Option<IndexQuote>,
    pub source: QuoteSource,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSummary {
    pub fn speakable_index(index: &Option<IndexQuote>) -> String {
        index
            .as_ref()
            .map(|i| i.speakable())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// Context handed to broker script generation.
    pub fn snapshot(&self) -> crate::domain::repositories::broker_model::MarketSnapshot {
        crate::domain::repositories::broker_model::MarketSnapshot {
            sp500: Self::speakable_index(&self.sp500),
            dow: Self::speakable_index(&self.dow),
            nasdaq: Self::speakable_index(&self.nasdaq),
        }
    }
}

#[derive(Clone)]
struct CachedQuote {
    price: f64,
    fetched_at: DateTime<Utc>,
    stored: Instant,
}

#[derive(Clone)]
struct CachedSummary {
    summary: MarketSummary,
    stored: Instant,
}

type QuoteResult = Result<MarketQuote, MarketDataError>;
type SummaryResult = Result<MarketSummary, MarketDataError>;

pub struct MarketDataService {
    feed: Arc<dyn QuoteFeed>,
    config: MarketDataConfig,
    quotes: Mutex<LruCache<String, CachedQuote>>,
    summary: Mutex<Option<CachedSummary>>,
    inflight_quotes: Mutex<HashMap<String, broadcast::Sender<QuoteResult>>>,
    inflight_summary: Mutex<Option<broadcast::Sender<SummaryResult>>>,
}

impl MarketDataService {
    pub fn new(feed: Arc<dyn QuoteFeed>, config: MarketDataConfig) -> Self {
        let capacity = NonZeroUsize::new(QUOTE_CACHE_CAPACITY).expect("capacity must be non-zero");
        Self {
            feed,
            config,
            quotes: Mutex::new(LruCache::new(capacity)),
            summary: Mutex::new(None),
            inflight_quotes: Mutex::new(HashMap::new()),
            inflight_summary: Mutex::new(None),
        }
    }

    /// Get a quote for `ticker`. `AllowCached` returns a non-expired cache
    /// entry without touching the network; otherwise the call joins or
    /// leads a single upstream fetch for that ticker.
    pub async fn get_quote(&self, ticker: &str, freshness: Freshness) -> QuoteResult {
        if freshness == Freshness::AllowCached {
            if let Some(quote) = self.cached_quote(ticker, false).await {
                debug!("Cache hit for {}", ticker);
                return Ok(quote);
            }
        }

        // Join an in-flight fetch for this ticker if one exists
        let mut rx = {
            let mut inflight = self.inflight_quotes.lock().await;
            match inflight.get(ticker) {
                Some(tx) => tx.subscribe(),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    inflight.insert(ticker.to_string(), tx);
                    drop(inflight);
                    return self.lead_quote_fetch(ticker).await;
                }
            }
        };

        debug!("Coalescing quote request for {} onto in-flight fetch", ticker);
        match rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::FetchFailed {
                ticker: ticker.to_string(),
                detail: "in-flight fetch abandoned".to_string(),
            }),
        }
    }

    /// The leader path of the single-flight: perform the fetch, publish the
    /// result to every waiter, and clear the in-flight slot.
    async fn lead_quote_fetch(&self, ticker: &str) -> QuoteResult {
        let result = self.fetch_quote_with_retries(ticker).await;

        let tx = self.inflight_quotes.lock().await.remove(ticker);
        if let Some(tx) = tx {
            // No receivers is fine; nobody coalesced onto this fetch
            let _ = tx.send(result.clone());
        }
        result
    }

    async fn fetch_quote_with_retries(&self, ticker: &str) -> QuoteResult {
        let mut backoff = Duration::from_millis(self.config.fetch_base_backoff_ms);
        let mut last_error: Option<FeedError> = None;

        for attempt in 1..=self.config.fetch_max_attempts {
            match self.feed.fetch_price(ticker).await {
                Ok(price) => {
                    let fetched_at = Utc::now();
                    self.store_quote(ticker, price, fetched_at).await;
                    info!("Quote for {}: {:.2} (attempt {})", ticker, price, attempt);
                    return Ok(MarketQuote {
                        ticker: ticker.to_string(),
                        price,
                        source: QuoteSource::Live,
                        fetched_at,
                    });
                }
                Err(e) if !e.is_transient() => {
                    warn!("Ticker {} not found upstream: {}", ticker, e);
                    return Err(MarketDataError::UnknownTicker(ticker.to_string()));
                }
                Err(e) => {
                    warn!(
                        "Quote fetch for {} failed (attempt {}/{}): {}",
                        ticker, attempt, self.config.fetch_max_attempts, e
                    );
                    last_error = Some(e);
                    if attempt < self.config.fetch_max_attempts {
                        tokio::time::sleep(with_jitter(backoff)).await;
                        backoff *= 2;
                    }
                }
            }
        }

        // Retry budget exhausted; hand back the last expired value if we
        // still have one rather than failing the caller outright.
        if let Some(stale) = self.cached_quote(ticker, true).await {
            warn!(
                "Serving stale fallback for {} (fetched at {})",
                ticker, stale.fetched_at
            );
            return Ok(stale);
        }

        Err(MarketDataError::FetchFailed {
            ticker: ticker.to_string(),
            detail: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn store_quote(&self, ticker: &str, price: f64, fetched_at: DateTime<Utc>) {
        let mut quotes = self.quotes.lock().await;
        quotes.put(
            ticker.to_string(),
            CachedQuote {
                price,
                fetched_at,
                stored: Instant::now(),
            },
        );
    }

    async fn cached_quote(&self, ticker: &str, allow_expired: bool) -> Option<MarketQuote> {
        let mut quotes = self.quotes.lock().await;
        let entry = quotes.get(ticker)?;
        let fresh = entry.stored.elapsed() <= self.config.staleness();
        if !fresh && !allow_expired {
            return None;
        }
        Some(MarketQuote {
            ticker: ticker.to_string(),
            price: entry.price,
            source: if fresh {
                QuoteSource::Live
            } else {
                QuoteSource::StaleFallback
            },
            fetched_at: entry.fetched_at,
        })
    }

    /// Market summary (S&P 500 / Dow / Nasdaq): same cache, single-flight,
    /// and stale-fallback contract as quotes, under its own key.
    pub async fn get_market_summary(&self, freshness: Freshness) -> SummaryResult {
        if freshness == Freshness::AllowCached {
            let cached = self.summary.lock().await;
            if let Some(entry) = cached.as_ref() {
                if entry.stored.elapsed() <= self.config.staleness() {
                    debug!("Market summary cache hit");
                    return Ok(entry.summary.clone());
                }
            }
        }

        let mut rx = {
            let mut inflight = self.inflight_summary.lock().await;
            match inflight.as_ref() {
                Some(tx) => tx.subscribe(),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    *inflight = Some(tx);
                    drop(inflight);
                    return self.lead_summary_fetch().await;
                }
            }
        };

        match rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::FetchFailed {
                ticker: "market_summary".to_string(),
                detail: "in-flight fetch abandoned".to_string(),
            }),
        }
    }

    async fn lead_summary_fetch(&self) -> SummaryResult {
        let result = self.fetch_summary_with_retries().await;

        let tx = self.inflight_summary.lock().await.take();
        if let Some(tx) = tx {
            let _ = tx.send(result.clone());
        }
        result
    }

    async fn fetch_summary_with_retries(&self) -> SummaryResult {
        let mut backoff = Duration::from_millis(self.config.fetch_base_backoff_ms);

        for attempt in 1..=self.config.fetch_max_attempts {
            let (sp500, dow, nasdaq) = tokio::join!(
                self.feed.fetch_index(SP500_SYMBOL),
                self.feed.fetch_index(DOW_SYMBOL),
                self.feed.fetch_index(NASDAQ_SYMBOL),
            );

            let sp500 = sp500.ok().map(IndexQuote::from);
            let dow = dow.ok().map(IndexQuote::from);
            let nasdaq = nasdaq.ok().map(IndexQuote::from);

            // A partial summary is still a summary; only a total blackout
            // counts as a failed attempt.
            if sp500.is_some() || dow.is_some() || nasdaq.is_some() {
                let summary = MarketSummary {
                    sp500,
                    dow,
                    nasdaq,
                    source: QuoteSource::Live,
                    fetched_at: Utc::now(),
                };
                let mut cached = self.summary.lock().await;
                *cached = Some(CachedSummary {
                    summary: summary.clone(),
                    stored: Instant::now(),
                });
                return Ok(summary);
            }

            warn!(
                "Market summary fetch failed on all indices (attempt {}/{})",
                attempt, self.config.fetch_max_attempts
            );
            if attempt < self.config.fetch_max_attempts {
                tokio::time::sleep(with_jitter(backoff)).await;
                backoff *= 2;
            }
        }

        let cached = self.summary.lock().await;
        if let Some(entry) = cached.as_ref() {
            warn!("Serving stale market summary fallback");
            let mut summary = entry.summary.clone();
            summary.source = QuoteSource::StaleFallback;
            return Ok(summary);
        }

        Err(MarketDataError::FetchFailed {
            ticker: "market_summary".to_string(),
            detail: "all indices unavailable".to_string(),
        })
    }
}

/// Add up to 50% random jitter so synchronized retries do not stampede the
/// upstream after a shared failure.
fn with_jitter(backoff: Duration) -> Duration {
    let base_ms = backoff.as_millis() as u64;
    let jitter_ms = {
        use rand::Rng;
        rand::thread_rng().gen_range(0..=base_ms / 2)
    };
    Duration::from_millis(base_ms + jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Mock feed with a scripted failure count and a fetch counter
    struct MockFeed {
        price: f64,
        fetch_count: AtomicU32,
        failures_before_success: u32,
        fetch_delay: Duration,
        not_found: bool,
    }

    impl MockFeed {
        fn new(price: f64) -> Self {
            Self {
                price,
                fetch_count: AtomicU32::new(0),
                failures_before_success: 0,
                fetch_delay: Duration::from_millis(0),
                not_found: false,
            }
        }

        fn fetches(&self) -> u32 {
            self.fetch_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuoteFeed for MockFeed {
        fn name(&self) -> &str {
            "MockFeed"
        }

        async fn fetch_price(&self, ticker: &str) -> Result<f64, FeedError> {
            let n = self.fetch_count.fetch_add(1, Ordering::SeqCst);
            if !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            if self.not_found {
                return Err(FeedError::NotFound(ticker.to_string()));
            }
            if n < self.failures_before_success {
                return Err(FeedError::Http("503".to_string()));
            }
            Ok(self.price)
        }

        async fn fetch_index(&self, _symbol: &str) -> Result<IndexSnapshot, FeedError> {
            let n = self.fetch_count.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                return Err(FeedError::Http("503".to_string()));
            }
            Ok(IndexSnapshot {
                price: self.price,
                change: 12.5,
                change_percent: 0.25,
            })
        }
    }

    fn fast_config() -> MarketDataConfig {
        MarketDataConfig {
            staleness_secs: 30,
            fetch_max_attempts: 3,
            fetch_base_backoff_ms: 1,
            request_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_cache_hit_avoids_second_fetch() {
        let feed = Arc::new(MockFeed::new(150.0));
        let service = MarketDataService::new(feed.clone(), fast_config());

        let first = service.get_quote("AAPL", Freshness::AllowCached).await.unwrap();
        let second = service.get_quote("AAPL", Freshness::AllowCached).await.unwrap();

        assert_eq!(first.price, 150.0);
        assert_eq!(second.source, QuoteSource::Live);
        assert_eq!(feed.fetches(), 1);
    }

    #[tokio::test]
    async fn test_force_fresh_refetches() {
        let feed = Arc::new(MockFeed::new(150.0));
        let service = MarketDataService::new(feed.clone(), fast_config());

        service.get_quote("AAPL", Freshness::AllowCached).await.unwrap();
        service.get_quote("AAPL", Freshness::ForceFresh).await.unwrap();

        assert_eq!(feed.fetches(), 2);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let feed = Arc::new(MockFeed {
            failures_before_success: 2,
            ..MockFeed::new(150.0)
        });
        let service = MarketDataService::new(feed.clone(), fast_config());

        let quote = service.get_quote("AAPL", Freshness::AllowCached).await.unwrap();
        assert_eq!(quote.source, QuoteSource::Live);
        assert_eq!(feed.fetches(), 3);
    }

    #[tokio::test]
    async fn test_stale_fallback_when_upstream_down() {
        let config = MarketDataConfig {
            staleness_secs: 0, // everything expires immediately
            ..fast_config()
        };
        let feed = Arc::new(MockFeed::new(150.0));
        let service = MarketDataService::new(feed.clone(), config);

        // Seed the cache with one good fetch
        service.get_quote("AAPL", Freshness::ForceFresh).await.unwrap();

        // Break the feed and ask again: the expired entry comes back tagged
        let broken = Arc::new(MockFeed {
            failures_before_success: u32::MAX,
            ..MockFeed::new(150.0)
        });
        let service = MarketDataService {
            feed: broken,
            ..service
        };

        let quote = service.get_quote("AAPL", Freshness::AllowCached).await.unwrap();
        assert_eq!(quote.source, QuoteSource::StaleFallback);
        assert_eq!(quote.price, 150.0);
    }

    #[tokio::test]
    async fn test_failure_without_fallback_errors() {
        let feed = Arc::new(MockFeed {
            failures_before_success: u32::MAX,
            ..MockFeed::new(150.0)
        });
        let service = MarketDataService::new(feed.clone(), fast_config());

        let result = service.get_quote("AAPL", Freshness::AllowCached).await;
        assert!(matches!(result, Err(MarketDataError::FetchFailed { .. })));
        assert_eq!(feed.fetches(), 3);
    }

    #[tokio::test]
    async fn test_not_found_skips_retries() {
        let feed = Arc::new(MockFeed {
            not_found: true,
            ..MockFeed::new(150.0)
        });
        let service = MarketDataService::new(feed.clone(), fast_config());

        let result = service.get_quote("ZZZZ", Freshness::AllowCached).await;
        assert!(matches!(result, Err(MarketDataError::UnknownTicker(_))));
        assert_eq!(feed.fetches(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_coalesce() {
        let feed = Arc::new(MockFeed {
            fetch_delay: Duration::from_millis(100),
            ..MockFeed::new(150.0)
        });
        let service = Arc::new(MarketDataService::new(feed.clone(), fast_config()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.get_quote("AAPL", Freshness::ForceFresh).await
            }));
        }

        for handle in handles {
            let quote = handle.await.unwrap().unwrap();
            assert_eq!(quote.price, 150.0);
        }

        // Five concurrent callers, exactly one upstream fetch
        assert_eq!(feed.fetches(), 1);
    }

    #[tokio::test]
    async fn test_market_summary_cached() {
        let feed = Arc::new(MockFeed::new(5432.10));
        let service = MarketDataService::new(feed.clone(), fast_config());

        let summary = service
            .get_market_summary(Freshness::AllowCached)
            .await
            .unwrap();
        assert!(summary.sp500.is_some());
        assert_eq!(summary.source, QuoteSource::Live);
        assert_eq!(feed.fetches(), 3); // three indices, one pass

        service
            .get_market_summary(Freshness::AllowCached)
            .await
            .unwrap();
        assert_eq!(feed.fetches(), 3); // cache hit
    }

    #[test]
    fn test_speakable_index() {
        let index = IndexQuote {
            price: 5432.1,
            change: 24.3,
            change_percent: 0.45,
        };
        assert_eq!(index.speakable(), "5432.10 (+0.45%)");
        assert_eq!(MarketSummary::speakable_index(&None), "Unknown");
    }
}
