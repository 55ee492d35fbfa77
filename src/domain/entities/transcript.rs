use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Broker,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Broker => "broker",
        }
    }

    pub fn parse(s: &str) -> Option<Speaker> {
        match s {
            "user" => Some(Speaker::User),
            "broker" => Some(Speaker::Broker),
            _ => None,
        }
    }
}

/// One line of the conversation log for a call session. Append-only and
/// ordered by `spoken_at`: the user's utterance and the broker's reply are
/// both recorded before the next utterance is accepted.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub call_id: String,
    pub speaker: Speaker,
    pub content: String,
    pub spoken_at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(call_id: String, speaker: Speaker, content: String) -> Self {
        TranscriptEntry {
            call_id,
            speaker,
            content,
            spoken_at: Utc::now(),
        }
    }
}
