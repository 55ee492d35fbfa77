//! Database Repository
//!
//! Data access layer for accounts, positions, trades, call sessions,
//! transcripts, and call schedules. The `ledger` module holds the
//! transaction-scoped statements the execution engine composes into one
//! atomic commit.

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::entities::call_schedule::CallSchedule;
use crate::domain::entities::call_session::CallSession;
use crate::domain::entities::position::Position;
use crate::domain::entities::trade::Trade;
use crate::domain::entities::transcript::TranscriptEntry;
use chrono::Utc;
use tracing::{debug, error};

/// Account repository
pub struct AccountRepository {
    pool: DbPool,
}

impl AccountRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a new account
    pub async fn create(&self, account: CreateAccount) -> Result<AccountRecord, DatabaseError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, AccountRecord>(
            r#"
            INSERT INTO accounts (user_id, name, phone_number, cash_balance, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            RETURNING *
            "#,
        )
        .bind(&account.user_id)
        .bind(&account.name)
        .bind(&account.phone_number)
        .bind(account.cash_balance)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create account: {}", e);
            DatabaseError::QueryError(format!("Failed to create account: {}", e))
        })?;

        debug!("Created account: {}", record.user_id);
        Ok(record)
    }

    /// Get account by user id
    pub async fn get(&self, user_id: &str) -> Result<Option<AccountRecord>, DatabaseError> {
        let record =
            sqlx::query_as::<_, AccountRecord>("SELECT * FROM accounts WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to get account {}: {}", user_id, e);
                    DatabaseError::QueryError(format!("Failed to get account: {}", e))
                })?;

        Ok(record)
    }

    /// Get account by phone number (inbound caller resolution)
    pub async fn get_by_phone(&self, phone: &str) -> Result<Option<AccountRecord>, DatabaseError> {
        let record =
            sqlx::query_as::<_, AccountRecord>("SELECT * FROM accounts WHERE phone_number = ?1")
                .bind(phone)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to get account by phone: {}", e);
                    DatabaseError::QueryError(format!("Failed to get account by phone: {}", e))
                })?;

        Ok(record)
    }
}

/// Position repository (reads; mutations go through `ledger`)
pub struct PositionRepository {
    pool: DbPool,
}

impl PositionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(
        &self,
        user_id: &str,
        ticker: &str,
    ) -> Result<Option<PositionRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE user_id = ?1 AND ticker = ?2",
        )
        .bind(user_id)
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get position {}/{}: {}", user_id, ticker, e);
            DatabaseError::QueryError(format!("Failed to get position: {}", e))
        })?;

        Ok(record)
    }

    pub async fn get_for_user(&self, user_id: &str) -> Result<Vec<PositionRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE user_id = ?1 ORDER BY ticker",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get positions for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to get positions: {}", e))
        })?;

        Ok(records)
    }
}

/// Trade repository (reads; inserts go through `ledger`)
pub struct TradeRepository {
    pool: DbPool,
}

impl TradeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get recent trades for a user (newest first)
    pub async fn get_recent_for_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<TradeRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades WHERE user_id = ?1 ORDER BY executed_at DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get trades for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to get trades: {}", e))
        })?;

        Ok(records)
    }
}

/// Call session repository
pub struct CallRepository {
    pool: DbPool,
}

impl CallRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, session: &CallSession) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO calls (
                id, provider_call_id, user_id, phone_number, direction, status,
                failure_reason, started_at, ended_at, duration_seconds, recording_url
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&session.id)
        .bind(&session.provider_call_id)
        .bind(&session.user_id)
        .bind(&session.phone_number)
        .bind(session.direction.as_str())
        .bind(session.status.as_str())
        .bind(&session.failure_reason)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.duration_seconds)
        .bind(&session.recording_url)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create call session: {}", e);
            DatabaseError::QueryError(format!("Failed to create call session: {}", e))
        })?;

        debug!("Created call session: {}", session.id);
        Ok(())
    }

    /// Persist the mutable portion of a session after a transition.
    pub async fn update(&self, session: &CallSession) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE calls
            SET provider_call_id = ?1, status = ?2, failure_reason = ?3,
                ended_at = ?4, duration_seconds = ?5, recording_url = ?6
            WHERE id = ?7
            "#,
        )
        .bind(&session.provider_call_id)
        .bind(session.status.as_str())
        .bind(&session.failure_reason)
        .bind(session.ended_at)
        .bind(session.duration_seconds)
        .bind(&session.recording_url)
        .bind(&session.id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update call session {}: {}", session.id, e);
            DatabaseError::QueryError(format!("Failed to update call session: {}", e))
        })?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!(
                "Call session not found: {}",
                session.id
            )));
        }

        debug!("Updated call session {} -> {}", session.id, session.status);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<CallSession>, DatabaseError> {
        let record = sqlx::query_as::<_, CallRecord>("SELECT * FROM calls WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get call session {}: {}", id, e);
                DatabaseError::QueryError(format!("Failed to get call session: {}", e))
            })?;

        record.map(|r| r.to_session()).transpose()
    }

    /// Look up a session by the provider's correlation key.
    pub async fn get_by_provider_id(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallSession>, DatabaseError> {
        let record =
            sqlx::query_as::<_, CallRecord>("SELECT * FROM calls WHERE provider_call_id = ?1")
                .bind(provider_call_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to get call by provider id: {}", e);
                    DatabaseError::QueryError(format!("Failed to get call by provider id: {}", e))
                })?;

        record.map(|r| r.to_session()).transpose()
    }

    pub async fn get_for_user(&self, user_id: &str) -> Result<Vec<CallSession>, DatabaseError> {
        let records = sqlx::query_as::<_, CallRecord>(
            "SELECT * FROM calls WHERE user_id = ?1 ORDER BY started_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get calls for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to get calls: {}", e))
        })?;

        records.into_iter().map(|r| r.to_session()).collect()
    }
}

/// Transcript repository
pub struct TranscriptRepository {
    pool: DbPool,
}

impl TranscriptRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append one entry to a call's conversation log.
    pub async fn append(&self, entry: &TranscriptEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO transcripts (call_id, speaker, content, spoken_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&entry.call_id)
        .bind(entry.speaker.as_str())
        .bind(&entry.content)
        .bind(entry.spoken_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to append transcript entry: {}", e);
            DatabaseError::QueryError(format!("Failed to append transcript entry: {}", e))
        })?;

        Ok(())
    }

    /// Full conversation log for a call, in spoken order.
    pub async fn for_call(&self, call_id: &str) -> Result<Vec<TranscriptRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, TranscriptRecord>(
            "SELECT * FROM transcripts WHERE call_id = ?1 ORDER BY id",
        )
        .bind(call_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get transcript for {}: {}", call_id, e);
            DatabaseError::QueryError(format!("Failed to get transcript: {}", e))
        })?;

        Ok(records)
    }
}

/// Call schedule repository
pub struct ScheduleRepository {
    pool: DbPool,
}

impl ScheduleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, schedule: &CallSchedule) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO call_schedules (id, user_id, phone_number, call_time, call_type, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&schedule.id)
        .bind(&schedule.user_id)
        .bind(&schedule.phone_number)
        .bind(&schedule.call_time)
        .bind(schedule.call_type.as_str())
        .bind(schedule.status.as_str())
        .bind(schedule.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create schedule: {}", e);
            DatabaseError::QueryError(format!("Failed to create schedule: {}", e))
        })?;

        debug!("Created call schedule: {}", schedule.id);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<CallSchedule>, DatabaseError> {
        let record =
            sqlx::query_as::<_, ScheduleRecord>("SELECT * FROM call_schedules WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to get schedule {}: {}", id, e);
                    DatabaseError::QueryError(format!("Failed to get schedule: {}", e))
                })?;

        record.map(|r| r.to_schedule()).transpose()
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<CallSchedule>, DatabaseError> {
        let records = sqlx::query_as::<_, ScheduleRecord>(
            "SELECT * FROM call_schedules WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list schedules for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to list schedules: {}", e))
        })?;

        records.into_iter().map(|r| r.to_schedule()).collect()
    }

    /// All schedules still in `scheduled` status (dispatcher input).
    pub async fn list_scheduled(&self) -> Result<Vec<CallSchedule>, DatabaseError> {
        let records = sqlx::query_as::<_, ScheduleRecord>(
            "SELECT * FROM call_schedules WHERE status = 'scheduled'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list scheduled calls: {}", e);
            DatabaseError::QueryError(format!("Failed to list scheduled calls: {}", e))
        })?;

        records.into_iter().map(|r| r.to_schedule()).collect()
    }

    /// Cancel a schedule. Sessions already spawned from it are unaffected.
    pub async fn cancel(&self, id: &str) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            "UPDATE call_schedules SET status = 'cancelled' WHERE id = ?1 AND status = 'scheduled'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to cancel schedule {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to cancel schedule: {}", e))
        })?
        .rows_affected();

        Ok(rows_affected > 0)
    }
}

/// Transaction-scoped ledger statements. The execution engine wraps these
/// in a single transaction so balance, position, and trade-record mutations
/// commit together or not at all.
pub mod ledger {
    use super::*;
    use sqlx::SqliteConnection;

    pub async fn account_cash(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<Option<f64>, sqlx::Error> {
        let row: Option<(f64,)> =
            sqlx::query_as("SELECT cash_balance FROM accounts WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(conn)
                .await?;
        Ok(row.map(|r| r.0))
    }

    pub async fn set_cash(
        conn: &mut SqliteConnection,
        user_id: &str,
        cash_balance: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET cash_balance = ?1, updated_at = ?2 WHERE user_id = ?3")
            .bind(cash_balance)
            .bind(Utc::now())
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn position(
        conn: &mut SqliteConnection,
        user_id: &str,
        ticker: &str,
    ) -> Result<Option<PositionRecord>, sqlx::Error> {
        sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE user_id = ?1 AND ticker = ?2",
        )
        .bind(user_id)
        .bind(ticker)
        .fetch_optional(conn)
        .await
    }

    pub async fn upsert_position(
        conn: &mut SqliteConnection,
        position: &Position,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO positions (user_id, ticker, quantity, avg_cost, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (user_id, ticker)
            DO UPDATE SET quantity = ?3, avg_cost = ?4, updated_at = ?5
            "#,
        )
        .bind(&position.user_id)
        .bind(&position.ticker)
        .bind(position.quantity)
        .bind(position.avg_cost)
        .bind(position.updated_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn delete_position(
        conn: &mut SqliteConnection,
        user_id: &str,
        ticker: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM positions WHERE user_id = ?1 AND ticker = ?2")
            .bind(user_id)
            .bind(ticker)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn insert_trade(
        conn: &mut SqliteConnection,
        trade: &Trade,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, user_id, ticker, action, quantity, price, total_value, call_id, executed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.user_id)
        .bind(&trade.ticker)
        .bind(trade.action.as_str())
        .bind(trade.quantity)
        .bind(trade.price)
        .bind(trade.total_value)
        .bind(&trade.call_id)
        .bind(trade.executed_at)
        .execute(conn)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::call_schedule::CallType;
    use crate::domain::entities::call_session::CallStatus;
    use crate::domain::entities::trade::TradeAction;
    use crate::domain::entities::transcript::Speaker;
    use crate::domain::value_objects::{price::Price, shares::Shares, ticker::Ticker};
    use crate::persistence::init_database;

    async fn pool_with_account() -> DbPool {
        let pool = init_database("sqlite::memory:").await.unwrap();
        AccountRepository::new(pool.clone())
            .create(CreateAccount {
                user_id: "user-1".to_string(),
                name: "Jordan".to_string(),
                phone_number: "+14155552671".to_string(),
                cash_balance: 10000.0,
            })
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_account_crud() {
        let pool = pool_with_account().await;
        let repo = AccountRepository::new(pool);

        let fetched = repo.get("user-1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "Jordan");
        assert_eq!(fetched.cash_balance, 10000.0);

        let by_phone = repo.get_by_phone("+14155552671").await.unwrap().unwrap();
        assert_eq!(by_phone.user_id, "user-1");

        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ledger_transaction_commits_together() {
        let pool = pool_with_account().await;

        let mut tx = pool.begin().await.unwrap();
        let cash = ledger::account_cash(&mut tx, "user-1").await.unwrap().unwrap();
        assert_eq!(cash, 10000.0);

        ledger::set_cash(&mut tx, "user-1", 8500.0).await.unwrap();
        let position = Position::opened(
            "user-1".to_string(),
            "AAPL".to_string(),
            Shares::new(10).unwrap(),
            Price::new(150.0).unwrap(),
        );
        ledger::upsert_position(&mut tx, &position).await.unwrap();
        let trade = Trade::new(
            "user-1".to_string(),
            Ticker::new("AAPL").unwrap(),
            TradeAction::Buy,
            Shares::new(10).unwrap(),
            Price::new(150.0).unwrap(),
            None,
        );
        ledger::insert_trade(&mut tx, &trade).await.unwrap();
        tx.commit().await.unwrap();

        let account = AccountRepository::new(pool.clone()).get("user-1").await.unwrap().unwrap();
        assert_eq!(account.cash_balance, 8500.0);
        let positions = PositionRepository::new(pool.clone()).get_for_user("user-1").await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, 10);
        let trades = TradeRepository::new(pool).get_recent_for_user("user-1", 10).await.unwrap();
        assert_eq!(trades.len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_rollback_leaves_no_trace() {
        let pool = pool_with_account().await;

        {
            let mut tx = pool.begin().await.unwrap();
            ledger::set_cash(&mut tx, "user-1", 1.0).await.unwrap();
            // Dropped without commit
        }

        let account = AccountRepository::new(pool).get("user-1").await.unwrap().unwrap();
        assert_eq!(account.cash_balance, 10000.0);
    }

    #[tokio::test]
    async fn test_call_session_roundtrip() {
        let pool = pool_with_account().await;
        let repo = CallRepository::new(pool);

        let mut session =
            CallSession::new_outbound("user-1".to_string(), "+14155552671".to_string());
        repo.create(&session).await.unwrap();

        session.accept("CA123");
        session.transition(CallStatus::InProgress);
        repo.update(&session).await.unwrap();

        let loaded = repo.get_by_provider_id("CA123").await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.status, CallStatus::InProgress);

        let by_id = repo.get(&session.id).await.unwrap().unwrap();
        assert_eq!(by_id.provider_call_id.as_deref(), Some("CA123"));
    }

    #[tokio::test]
    async fn test_transcript_append_ordering() {
        let pool = pool_with_account().await;
        let calls = CallRepository::new(pool.clone());
        let session = CallSession::new_outbound("user-1".to_string(), "+14155552671".to_string());
        calls.create(&session).await.unwrap();

        let repo = TranscriptRepository::new(pool);
        repo.append(&TranscriptEntry::new(
            session.id.clone(),
            Speaker::Broker,
            "Hey! What can I do for you?".to_string(),
        ))
        .await
        .unwrap();
        repo.append(&TranscriptEntry::new(
            session.id.clone(),
            Speaker::User,
            "Buy ten shares of Apple".to_string(),
        ))
        .await
        .unwrap();

        let entries = repo.for_call(&session.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker, "broker");
        assert_eq!(entries[1].speaker, "user");
    }

    #[tokio::test]
    async fn test_schedule_cancel() {
        let pool = pool_with_account().await;
        let repo = ScheduleRepository::new(pool);

        let schedule = CallSchedule::new(
            "user-1".to_string(),
            "+14155552671".to_string(),
            "09:30",
            CallType::MarketOpen,
        )
        .unwrap();
        repo.create(&schedule).await.unwrap();

        assert_eq!(repo.list_scheduled().await.unwrap().len(), 1);
        assert!(repo.cancel(&schedule.id).await.unwrap());
        assert_eq!(repo.list_scheduled().await.unwrap().len(), 0);
        // Cancelling twice is a no-op
        assert!(!repo.cancel(&schedule.id).await.unwrap());
    }
}
