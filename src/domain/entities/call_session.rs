use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a call session.
///
/// `requested -> provider_accepted -> in_progress -> {completed | failed}`
///
/// Variants carry an explicit rank so transitions are monotonic by
/// construction: a session never moves backward, and a duplicate or
/// out-of-order webhook targeting a rank at or below the current one is a
/// no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Requested,
    ProviderAccepted,
    InProgress,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn rank(&self) -> u8 {
        match self {
            CallStatus::Requested => 0,
            CallStatus::ProviderAccepted => 1,
            CallStatus::InProgress => 2,
            CallStatus::Completed => 3,
            CallStatus::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Requested => "requested",
            CallStatus::ProviderAccepted => "provider_accepted",
            CallStatus::InProgress => "in_progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<CallStatus> {
        match s {
            "requested" => Some(CallStatus::Requested),
            "provider_accepted" => Some(CallStatus::ProviderAccepted),
            "in_progress" => Some(CallStatus::InProgress),
            "completed" => Some(CallStatus::Completed),
            "failed" => Some(CallStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<CallDirection> {
        match s {
            "inbound" => Some(CallDirection::Inbound),
            "outbound" => Some(CallDirection::Outbound),
            _ => None,
        }
    }
}

/// Result of applying a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// Duplicate, out-of-order, or post-terminal event; state unchanged.
    Ignored,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    pub id: String,
    /// Correlation key for webhook events; assigned once the provider
    /// accepts the call.
    pub provider_call_id: Option<String>,
    pub user_id: String,
    pub phone_number: String,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub recording_url: Option<String>,
}

impl CallSession {
    pub fn new_outbound(user_id: String, phone_number: String) -> Self {
        Self::new(user_id, phone_number, CallDirection::Outbound)
    }

    pub fn new_inbound(user_id: String, phone_number: String) -> Self {
        Self::new(user_id, phone_number, CallDirection::Inbound)
    }

    fn new(user_id: String, phone_number: String, direction: CallDirection) -> Self {
        CallSession {
            id: Uuid::new_v4().to_string(),
            provider_call_id: None,
            user_id,
            phone_number,
            direction,
            status: CallStatus::Requested,
            failure_reason: None,
            started_at: Utc::now(),
            ended_at: None,
            duration_seconds: None,
            recording_url: None,
        }
    }

    /// Apply a forward transition. Idempotent: a target whose rank is at or
    /// below the current status is ignored, and terminal states accept no
    /// further transitions. Terminal transitions stamp `ended_at` and
    /// compute the duration.
    pub fn transition(&mut self, target: CallStatus) -> Transition {
        if self.status.is_terminal() || target.rank() <= self.status.rank() {
            return Transition::Ignored;
        }

        self.status = target;
        if target.is_terminal() {
            let ended = Utc::now();
            self.ended_at = Some(ended);
            self.duration_seconds = Some((ended - self.started_at).num_seconds().max(0));
        }
        Transition::Applied
    }

    /// Record the provider's acknowledgement and its call id. The id is
    /// assigned only once; repeated acknowledgements keep the first.
    pub fn accept(&mut self, provider_call_id: &str) -> Transition {
        if self.provider_call_id.is_none() {
            self.provider_call_id = Some(provider_call_id.to_string());
        }
        self.transition(CallStatus::ProviderAccepted)
    }

    /// Fail the session with a reason. The reason is only recorded when the
    /// transition actually applies.
    pub fn fail(&mut self, reason: &str) -> Transition {
        let outcome = self.transition(CallStatus::Failed);
        if outcome == Transition::Applied {
            self.failure_reason = Some(reason.to_string());
        }
        outcome
    }

    /// Attach a recording URL. Recordings may arrive after completion, so
    /// this is the one mutation allowed on a terminal session.
    pub fn set_recording_url(&mut self, url: &str) {
        self.recording_url = Some(url.to_string());
    }
}
