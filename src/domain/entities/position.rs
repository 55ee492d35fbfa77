use crate::domain::value_objects::{price::Price, shares::Shares};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A holding of one ticker in one account. Invariant: `quantity > 0`; a
/// position whose quantity reaches zero is deleted, and its average-cost
/// history with it (a later buy starts a fresh basis).
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub user_id: String,
    pub ticker: String,
    pub quantity: i64,
    pub avg_cost: f64,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Open a fresh position from a first buy.
    pub fn opened(user_id: String, ticker: String, shares: Shares, price: Price) -> Self {
        Position {
            user_id,
            ticker,
            quantity: shares.value(),
            avg_cost: price.value(),
            updated_at: Utc::now(),
        }
    }

    /// Fold a buy into the position using weighted-average cost basis:
    /// `(old_qty * old_avg + qty * price) / new_qty`.
    pub fn with_buy(&self, shares: Shares, price: Price) -> Position {
        let added_cost = shares.value() as f64 * price.value();
        let new_quantity = self.quantity + shares.value();
        let new_avg_cost =
            (self.quantity as f64 * self.avg_cost + added_cost) / new_quantity as f64;
        Position {
            user_id: self.user_id.clone(),
            ticker: self.ticker.clone(),
            quantity: new_quantity,
            avg_cost: new_avg_cost,
            updated_at: Utc::now(),
        }
    }

    /// Reduce the position by a sale. The cost basis of the remaining shares
    /// is unaffected by a partial sale. Returns `None` when the position is
    /// fully closed. Callers must have verified `shares <= quantity`.
    pub fn with_sell(&self, shares: Shares) -> Option<Position> {
        let remaining = self.quantity - shares.value();
        if remaining <= 0 {
            return None;
        }
        Some(Position {
            user_id: self.user_id.clone(),
            ticker: self.ticker.clone(),
            quantity: remaining,
            avg_cost: self.avg_cost,
            updated_at: Utc::now(),
        })
    }

    pub fn market_value(&self, current_price: f64) -> f64 {
        self.quantity as f64 * current_price
    }

    /// Percent gain/loss against the average cost.
    pub fn profit_loss_percent(&self, current_price: f64) -> f64 {
        ((current_price - self.avg_cost) / self.avg_cost) * 100.0
    }
}
