//! Trade Execution Engine
//!
//! The only writer of the ledger. Each accepted intent becomes one atomic
//! transaction over cash balance, position, and the immutable trade record;
//! a rejection or a persistence failure leaves the account exactly as it
//! was. Per-account keyed locks serialize trades for the same user, whether
//! they come from overlapping calls or direct API requests.

use crate::domain::entities::position::Position;
use crate::domain::entities::trade::{Trade, TradeAction};
use crate::domain::errors::{ExecutionError, TradeRejection};
use crate::domain::services::intent::TradeIntent;
use crate::domain::services::locks::KeyedLocks;
use crate::domain::services::market_data::{Freshness, MarketDataService, QuoteSource};
use crate::domain::value_objects::price::Price;
use crate::application::actors::broadcaster::{Broadcaster, BrokerEvent};
use crate::persistence::repository::ledger;
use crate::persistence::DbPool;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ExecutionEngine {
    pool: DbPool,
    market: Arc<MarketDataService>,
    broadcaster: Arc<Broadcaster>,
    account_locks: KeyedLocks,
}

impl ExecutionEngine {
    pub fn new(pool: DbPool, market: Arc<MarketDataService>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            pool,
            market,
            broadcaster,
            account_locks: KeyedLocks::new(),
        }
    }

    /// Execute a validated intent for `user_id`. On success the trade is
    /// durable before this returns; on any error nothing changed.
    pub async fn execute(
        &self,
        user_id: &str,
        intent: &TradeIntent,
        call_id: Option<&str>,
    ) -> Result<Trade, ExecutionError> {
        // One in-flight trade per account; other accounts don't contend
        let _account_guard = self.account_locks.acquire(user_id).await;

        let quote = self
            .market
            .get_quote(intent.ticker.as_str(), Freshness::AllowCached)
            .await
            .map_err(|e| {
                warn!("Quote unavailable for {}: {}", intent.ticker, e);
                TradeRejection::QuoteUnavailable {
                    ticker: intent.ticker.as_str().to_string(),
                }
            })?;

        if quote.source == QuoteSource::StaleFallback {
            warn!(
                "Executing against stale quote for {} (fetched at {})",
                intent.ticker, quote.fetched_at
            );
        }

        let price = Price::new(quote.price).map_err(|e| ExecutionError::Internal(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let cash = ledger::account_cash(&mut tx, user_id)
            .await?
            .ok_or_else(|| ExecutionError::Internal(format!("Account not found: {}", user_id)))?;
        let held = ledger::position(&mut tx, user_id, intent.ticker.as_str()).await?;

        let required = intent.shares.value() as f64 * price.value();

        match intent.action {
            TradeAction::Buy => {
                if required > cash {
                    return Err(TradeRejection::InsufficientFunds {
                        required,
                        available: cash,
                    }
                    .into());
                }

                let position = match &held {
                    Some(record) => record.to_position().with_buy(intent.shares, price),
                    None => Position::opened(
                        user_id.to_string(),
                        intent.ticker.as_str().to_string(),
                        intent.shares,
                        price,
                    ),
                };

                ledger::set_cash(&mut tx, user_id, cash - required).await?;
                ledger::upsert_position(&mut tx, &position).await?;
            }
            TradeAction::Sell => {
                let Some(record) = &held else {
                    return Err(TradeRejection::InsufficientShares {
                        requested: intent.shares.value(),
                        held: 0,
                    }
                    .into());
                };
                if intent.shares.value() > record.quantity {
                    return Err(TradeRejection::InsufficientShares {
                        requested: intent.shares.value(),
                        held: record.quantity,
                    }
                    .into());
                }

                ledger::set_cash(&mut tx, user_id, cash + required).await?;
                match record.to_position().with_sell(intent.shares) {
                    Some(remaining) => ledger::upsert_position(&mut tx, &remaining).await?,
                    None => {
                        // Fully closed; the cost-basis history goes with it
                        ledger::delete_position(&mut tx, user_id, intent.ticker.as_str()).await?
                    }
                }
            }
        }

        let trade = Trade::new(
            user_id.to_string(),
            intent.ticker.clone(),
            intent.action,
            intent.shares,
            price,
            call_id.map(str::to_string),
        );
        ledger::insert_trade(&mut tx, &trade).await?;

        // Success is only acknowledged once the commit is durable; a
        // failure here rolls everything back to the pre-trade state.
        tx.commit().await?;

        info!(
            "Executed {} {} {} @ {:.2} for {} (total {:.2})",
            trade.action, trade.quantity, trade.ticker, trade.price, user_id, trade.total_value
        );

        self.broadcaster
            .publish(
                user_id,
                BrokerEvent::TradeExecuted {
                    user_id: user_id.to_string(),
                    trade: trade.clone(),
                },
            )
            .await;

        Ok(trade)
    }
}
