//! Database record models

use crate::domain::entities::call_schedule::{CallSchedule, CallType, ScheduleStatus};
use crate::domain::entities::call_session::{CallDirection, CallSession, CallStatus};
use crate::persistence::DatabaseError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AccountRecord {
    pub user_id: String,
    pub name: String,
    pub phone_number: String,
    pub cash_balance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an account (test seeding and demo bootstrap; real
/// registration lives outside this service).
#[derive(Debug, Clone)]
pub struct CreateAccount {
    pub user_id: String,
    pub name: String,
    pub phone_number: String,
    pub cash_balance: f64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PositionRecord {
    pub user_id: String,
    pub ticker: String,
    pub quantity: i64,
    pub avg_cost: f64,
    pub updated_at: DateTime<Utc>,
}

impl PositionRecord {
    pub fn to_position(&self) -> crate::domain::entities::position::Position {
        crate::domain::entities::position::Position {
            user_id: self.user_id.clone(),
            ticker: self.ticker.clone(),
            quantity: self.quantity,
            avg_cost: self.avg_cost,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TradeRecord {
    pub id: String,
    pub user_id: String,
    pub ticker: String,
    pub action: String,
    pub quantity: i64,
    pub price: f64,
    pub total_value: f64,
    pub call_id: Option<String>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CallRecord {
    pub id: String,
    pub provider_call_id: Option<String>,
    pub user_id: String,
    pub phone_number: String,
    pub direction: String,
    pub status: String,
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub recording_url: Option<String>,
}

impl CallRecord {
    /// Rehydrate the domain entity. Status and direction strings are
    /// constrained by CHECK clauses, so a parse failure means row corruption.
    pub fn to_session(&self) -> Result<CallSession, DatabaseError> {
        let status = CallStatus::parse(&self.status).ok_or_else(|| {
            DatabaseError::QueryError(format!("Corrupt call status: {}", self.status))
        })?;
        let direction = CallDirection::parse(&self.direction).ok_or_else(|| {
            DatabaseError::QueryError(format!("Corrupt call direction: {}", self.direction))
        })?;
        Ok(CallSession {
            id: self.id.clone(),
            provider_call_id: self.provider_call_id.clone(),
            user_id: self.user_id.clone(),
            phone_number: self.phone_number.clone(),
            direction,
            status,
            failure_reason: self.failure_reason.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_seconds: self.duration_seconds,
            recording_url: self.recording_url.clone(),
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TranscriptRecord {
    pub id: i64,
    pub call_id: String,
    pub speaker: String,
    pub content: String,
    pub spoken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ScheduleRecord {
    pub id: String,
    pub user_id: String,
    pub phone_number: String,
    pub call_time: String,
    pub call_type: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl ScheduleRecord {
    pub fn to_schedule(&self) -> Result<CallSchedule, DatabaseError> {
        let call_type = CallType::parse(&self.call_type).ok_or_else(|| {
            DatabaseError::QueryError(format!("Corrupt call type: {}", self.call_type))
        })?;
        let status = ScheduleStatus::parse(&self.status).ok_or_else(|| {
            DatabaseError::QueryError(format!("Corrupt schedule status: {}", self.status))
        })?;
        Ok(CallSchedule {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            phone_number: self.phone_number.clone(),
            call_time: self.call_time.clone(),
            call_type,
            status,
            created_at: self.created_at,
        })
    }
}
