//! Portfolio read model
//!
//! Values an account by pricing each position through the market data
//! cache. A read can optionally force a fresh price refresh; positions the
//! feed cannot price right now are still listed, just without a current
//! value.

use crate::domain::repositories::broker_model::{ClientSnapshot, PositionLine};
use crate::domain::services::market_data::{Freshness, MarketDataService, QuoteSource};
use crate::persistence::models::TradeRecord;
use crate::persistence::repository::{AccountRepository, PositionRepository, TradeRepository};
use crate::persistence::DbPool;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// How many recent trades to surface in summaries and prompt context
const RECENT_TRADES_LIMIT: i64 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub ticker: String,
    pub quantity: i64,
    pub avg_cost: f64,
    pub current_price: Option<f64>,
    pub value: Option<f64>,
    pub profit_loss_percent: Option<f64>,
    pub price_source: Option<QuoteSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub user_id: String,
    pub name: String,
    pub cash_balance: f64,
    /// Cash plus the market value of every priceable position
    pub portfolio_value: f64,
    pub positions: Vec<PositionView>,
    pub recent_trades: Vec<TradeRecord>,
}

impl PortfolioSummary {
    /// Context handed to broker script generation.
    pub fn client_snapshot(&self) -> ClientSnapshot {
        let positions = self
            .positions
            .iter()
            .filter_map(|p| {
                Some(PositionLine {
                    ticker: p.ticker.clone(),
                    quantity: p.quantity,
                    value: p.value?,
                    profit_loss_percent: p.profit_loss_percent?,
                })
            })
            .collect();

        let recent_trades = if self.recent_trades.is_empty() {
            "No recent trades.".to_string()
        } else {
            self.recent_trades
                .iter()
                .map(|t| {
                    format!(
                        "{}{} {} {} @ ${:.2}",
                        t.action[..1].to_uppercase(),
                        &t.action[1..],
                        t.quantity,
                        t.ticker,
                        t.price
                    )
                })
                .collect::<Vec<_>>()
                .join("; ")
        };

        ClientSnapshot {
            name: self.name.clone(),
            portfolio_value: self.portfolio_value,
            cash_balance: self.cash_balance,
            positions,
            recent_trades,
        }
    }
}

pub struct PortfolioService {
    accounts: AccountRepository,
    positions: PositionRepository,
    trades: TradeRepository,
    market: Arc<MarketDataService>,
}

impl PortfolioService {
    pub fn new(pool: DbPool, market: Arc<MarketDataService>) -> Self {
        Self {
            accounts: AccountRepository::new(pool.clone()),
            positions: PositionRepository::new(pool.clone()),
            trades: TradeRepository::new(pool),
            market,
        }
    }

    pub async fn summary(
        &self,
        user_id: &str,
        force_fresh: bool,
    ) -> Result<PortfolioSummary, String> {
        let account = self
            .accounts
            .get(user_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Account not found: {}", user_id))?;

        let records = self
            .positions
            .get_for_user(user_id)
            .await
            .map_err(|e| e.to_string())?;

        let freshness = if force_fresh {
            Freshness::ForceFresh
        } else {
            Freshness::AllowCached
        };

        let mut portfolio_value = account.cash_balance;
        let mut positions = Vec::with_capacity(records.len());

        for record in records {
            let entity = record.to_position();
            match self.market.get_quote(&record.ticker, freshness).await {
                Ok(quote) => {
                    let value = entity.market_value(quote.price);
                    portfolio_value += value;
                    positions.push(PositionView {
                        ticker: record.ticker,
                        quantity: record.quantity,
                        avg_cost: record.avg_cost,
                        current_price: Some(quote.price),
                        value: Some(value),
                        profit_loss_percent: Some(entity.profit_loss_percent(quote.price)),
                        price_source: Some(quote.source),
                    });
                }
                Err(e) => {
                    debug!("Could not price {} for summary: {}", record.ticker, e);
                    positions.push(PositionView {
                        ticker: record.ticker,
                        quantity: record.quantity,
                        avg_cost: record.avg_cost,
                        current_price: None,
                        value: None,
                        profit_loss_percent: None,
                        price_source: None,
                    });
                }
            }
        }

        let recent_trades = self
            .trades
            .get_recent_for_user(user_id, RECENT_TRADES_LIMIT)
            .await
            .map_err(|e| e.to_string())?;

        Ok(PortfolioSummary {
            user_id: account.user_id,
            name: account.name,
            cash_balance: account.cash_balance,
            portfolio_value,
            positions,
            recent_trades,
        })
    }
}
