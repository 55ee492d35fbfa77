use crate::domain::errors::ValidationError;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    MarketOpen,
    MidDay,
    MarketClose,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::MarketOpen => "market_open",
            CallType::MidDay => "mid_day",
            CallType::MarketClose => "market_close",
        }
    }

    pub fn parse(s: &str) -> Option<CallType> {
        match s {
            "market_open" => Some(CallType::MarketOpen),
            "mid_day" => Some(CallType::MidDay),
            "market_close" => Some(CallType::MarketClose),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Scheduled,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "scheduled",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<ScheduleStatus> {
        match s {
            "scheduled" => Some(ScheduleStatus::Scheduled),
            "cancelled" => Some(ScheduleStatus::Cancelled),
            _ => None,
        }
    }
}

/// A recurring request for an outbound broker call, firing daily at
/// `call_time` ("HH:MM", UTC). Schedules and the sessions they spawn have
/// independent lifecycles: cancelling a schedule never touches sessions
/// already created from it.
#[derive(Debug, Clone, Serialize)]
pub struct CallSchedule {
    pub id: String,
    pub user_id: String,
    pub phone_number: String,
    pub call_time: String,
    pub call_type: CallType,
    pub status: ScheduleStatus,
    pub created_at: DateTime<Utc>,
}

impl CallSchedule {
    pub fn new(
        user_id: String,
        phone_number: String,
        call_time: &str,
        call_type: CallType,
    ) -> Result<Self, ValidationError> {
        parse_call_time(call_time)?;
        Ok(CallSchedule {
            id: Uuid::new_v4().to_string(),
            user_id,
            phone_number,
            call_time: call_time.to_string(),
            call_type,
            status: ScheduleStatus::Scheduled,
            created_at: Utc::now(),
        })
    }

    /// Whether this schedule fires in the minute containing `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.status != ScheduleStatus::Scheduled {
            return false;
        }
        match parse_call_time(&self.call_time) {
            Ok((hour, minute)) => now.hour() == hour && now.minute() == minute,
            Err(_) => false,
        }
    }
}

/// Parse a "HH:MM" schedule time.
pub fn parse_call_time(s: &str) -> Result<(u32, u32), ValidationError> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| ValidationError::InvalidCallTime(format!("'{}' (expected HH:MM)", s)))?;
    let hour: u32 = h
        .parse()
        .map_err(|_| ValidationError::InvalidCallTime(format!("'{}' (bad hour)", s)))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| ValidationError::InvalidCallTime(format!("'{}' (bad minute)", s)))?;
    if hour > 23 || minute > 59 {
        return Err(ValidationError::InvalidCallTime(format!(
            "'{}' (out of range)",
            s
        )));
    }
    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_schedule_new_validates_time() {
        assert!(CallSchedule::new(
            "user-1".to_string(),
            "+14155552671".to_string(),
            "09:30",
            CallType::MarketOpen,
        )
        .is_ok());

        assert!(CallSchedule::new(
            "user-1".to_string(),
            "+14155552671".to_string(),
            "25:00",
            CallType::MarketOpen,
        )
        .is_err());

        assert!(CallSchedule::new(
            "user-1".to_string(),
            "+14155552671".to_string(),
            "soon",
            CallType::MarketOpen,
        )
        .is_err());
    }

    #[test]
    fn test_is_due_matches_minute() {
        let schedule = CallSchedule::new(
            "user-1".to_string(),
            "+14155552671".to_string(),
            "14:30",
            CallType::MidDay,
        )
        .unwrap();

        let due = Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 45).unwrap();
        let not_due = Utc.with_ymd_and_hms(2025, 6, 2, 14, 31, 0).unwrap();
        assert!(schedule.is_due(due));
        assert!(!schedule.is_due(not_due));
    }

    #[test]
    fn test_cancelled_schedule_never_due() {
        let mut schedule = CallSchedule::new(
            "user-1".to_string(),
            "+14155552671".to_string(),
            "14:30",
            CallType::MidDay,
        )
        .unwrap();
        schedule.status = ScheduleStatus::Cancelled;

        let due = Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap();
        assert!(!schedule.is_due(due));
    }

    #[test]
    fn test_call_type_parse() {
        assert_eq!(CallType::parse("market_open"), Some(CallType::MarketOpen));
        assert_eq!(CallType::parse("mid_day"), Some(CallType::MidDay));
        assert_eq!(CallType::parse("market_close"), Some(CallType::MarketClose));
        assert_eq!(CallType::parse("weekly"), None);
    }
}
