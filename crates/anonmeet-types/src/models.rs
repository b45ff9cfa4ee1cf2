use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bounded, code-addressable chat session. `active` flips false exactly
/// once when the owner ends the room; an ended room is never revived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    /// Six alphanumeric characters, stored upper-case, unique
    /// case-insensitively.
    pub code: String,
    pub name: String,
    pub owner_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A user's participation record within one room. The `anonymous_id` display
/// handle is assigned on first join and reused on every rejoin for the
/// room's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub room_id: Uuid,
    pub user_id: Uuid,
    /// Display handle of the form `Anon#XXXX`.
    pub anonymous_id: String,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollType {
    #[serde(rename = "yesno")]
    YesNo,
    #[serde(rename = "multiple-choice")]
    MultipleChoice,
}

impl PollType {
    /// The wire string, also used as the storage encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YesNo => "yesno",
            Self::MultipleChoice => "multiple-choice",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "yesno" => Some(Self::YesNo),
            "multiple-choice" => Some(Self::MultipleChoice),
            _ => None,
        }
    }
}
