use crate::domain::value_objects::{price::Price, shares::Shares, ticker::Ticker};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<TradeAction> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Some(TradeAction::Buy),
            "sell" => Some(TradeAction::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An executed paper trade. Append-only: never updated or deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub id: String,
    pub user_id: String,
    pub ticker: String,
    pub action: TradeAction,
    pub quantity: i64,
    pub price: f64,
    pub total_value: f64,
    pub call_id: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    pub fn new(
        user_id: String,
        ticker: Ticker,
        action: TradeAction,
        shares: Shares,
        price: Price,
        call_id: Option<String>,
    ) -> Self {
        Trade {
            id: Uuid::new_v4().to_string(),
            user_id,
            ticker: ticker.as_str().to_string(),
            action,
            quantity: shares.value(),
            price: price.value(),
            total_value: shares.value() as f64 * price.value(),
            call_id,
            executed_at: Utc::now(),
        }
    }
}
