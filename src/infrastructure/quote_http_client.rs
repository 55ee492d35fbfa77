//! HTTP quote feed
//!
//! `QuoteFeed` adapter over a Yahoo-style chart endpoint. This layer does
//! no retrying and no caching; it classifies failures (rate-limit and
//! server errors are transient, unknown symbols are not) and leaves policy
//! to the market data service.

use crate::domain::errors::FeedError;
use crate::domain::repositories::quote_feed::{IndexSnapshot, QuoteFeed};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

pub struct HttpQuoteFeed {
    client: Client,
    base_url: String,
}

impl HttpQuoteFeed {
    pub fn new(request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(request_timeout: Duration, base_url: String) -> Self {
        let mut feed = Self::new(request_timeout);
        feed.base_url = base_url.trim_end_matches('/').to_string();
        feed
    }

    async fn fetch_chart(&self, symbol: &str) -> Result<ChartMeta, FeedError> {
        // Index symbols start with '^', which must be escaped in the path
        let encoded = symbol.replace('^', "%5E");
        let url = format!(
            "{}/v8/finance/chart/{}?range=1d&interval=1d",
            self.base_url, encoded
        );

        debug!("Fetching chart for {}", symbol);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                FeedError::Timeout
            } else {
                FeedError::Http(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(FeedError::NotFound(symbol.to_string())),
            StatusCode::TOO_MANY_REQUESTS => return Err(FeedError::RateLimited),
            status if !status.is_success() => {
                return Err(FeedError::Http(format!("status {}", status)))
            }
            _ => {}
        }

        let body: ChartResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Malformed(e.to_string()))?;

        let result = body
            .chart
            .result
            .and_then(|mut results| {
                if results.is_empty() {
                    None
                } else {
                    Some(results.remove(0))
                }
            })
            .ok_or_else(|| FeedError::NotFound(symbol.to_string()))?;

        Ok(result.meta)
    }
}

#[async_trait]
impl QuoteFeed for HttpQuoteFeed {
    fn name(&self) -> &str {
        "HttpQuoteFeed"
    }

    async fn fetch_price(&self, ticker: &str) -> Result<f64, FeedError> {
        let meta = self.fetch_chart(ticker).await?;
        meta.regular_market_price
            .ok_or_else(|| FeedError::Malformed(format!("No market price for {}", ticker)))
    }

    async fn fetch_index(&self, symbol: &str) -> Result<IndexSnapshot, FeedError> {
        let meta = self.fetch_chart(symbol).await?;
        let price = meta
            .regular_market_price
            .ok_or_else(|| FeedError::Malformed(format!("No market price for {}", symbol)))?;
        let previous = meta
            .chart_previous_close
            .ok_or_else(|| FeedError::Malformed(format!("No previous close for {}", symbol)))?;

        let change = price - previous;
        let change_percent = if previous != 0.0 {
            (change / previous) * 100.0
        } else {
            0.0
        };

        Ok(IndexSnapshot {
            price,
            change,
            change_percent,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(rename = "chartPreviousClose")]
    chart_previous_close: Option<f64>,
}
