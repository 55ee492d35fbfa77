use chrono::{DateTime, Utc};

/// A paper-trading account. `cash_balance` is mutated only by the execution
/// engine and never goes negative.
#[derive(Debug, Clone)]
pub struct Account {
    pub user_id: String,
    pub name: String,
    pub phone_number: String,
    pub cash_balance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: String, name: String, phone_number: String, cash_balance: f64) -> Self {
        let now = Utc::now();
        Account {
            user_id,
            name,
            phone_number,
            cash_balance,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_afford(&self, amount: f64) -> bool {
        amount <= self.cash_balance
    }
}
