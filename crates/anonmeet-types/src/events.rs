use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::PollType;

/// Commands sent FROM client TO server over the room channel.
///
/// Wire form: `{"type": "vote_poll", "data": {"pollId": ..., ...}}` —
/// snake_case tags, camelCase payload fields. Field-name normalization lives
/// entirely here at the serde boundary; the core never sees wire casing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    JoinRoom {
        room_id: Uuid,
        user_id: Uuid,
        anonymous_id: String,
    },
    LeaveRoom {
        room_id: Uuid,
        user_id: Uuid,
        anonymous_id: String,
    },
    SendMessage {
        room_id: Uuid,
        user_id: Uuid,
        content: String,
        anonymous_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<Uuid>,
    },
    AddReaction {
        room_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        reaction_type: String,
        anonymous_id: String,
    },
    CreatePoll {
        room_id: Uuid,
        user_id: Uuid,
        question: String,
        poll_type: PollType,
        options: Vec<String>,
        anonymous_id: String,
    },
    VotePoll {
        room_id: Uuid,
        poll_id: Uuid,
        user_id: Uuid,
        option_index: usize,
        anonymous_id: String,
    },
    EndPoll {
        room_id: Uuid,
        poll_id: Uuid,
        user_id: Uuid,
    },
}

/// Events sent FROM server TO client over the room channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Full authoritative snapshot, sent on (re)join. Replaces local
    /// membership and poll collections outright.
    RoomState {
        members: Vec<WireMember>,
        polls: Vec<WirePoll>,
    },

    /// A message was appended to the room.
    NewMessage(WireMessage),

    /// Reaction tallies changed on a message. `user_reactions` is the full
    /// per-user map, so applying it is an idempotent replacement.
    ReactionUpdate {
        message_id: Uuid,
        reactions: HashMap<String, u32>,
        user_reactions: HashMap<Uuid, String>,
    },

    /// A poll was created.
    NewPoll(WirePoll),

    /// A single vote was cast or changed. Carries the voter's raw
    /// `(user_id, option_index)` so clients can upsert instead of trusting
    /// the counters.
    PollVoteUpdate {
        poll_id: Uuid,
        vote_counts: Vec<u32>,
        total_votes: u32,
        user_id: Uuid,
        option_index: usize,
    },

    /// A poll was ended; tallies are frozen at `final_results`.
    PollEnded {
        poll_id: Uuid,
        final_results: FinalResults,
    },

    /// Membership changed. Carries the full current member list.
    UserJoined { members: Vec<WireMember> },
    UserLeft { members: Vec<WireMember> },

    MessageError { error: String },
    PollError { error: String },
    VoteError { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMember {
    pub user_id: Uuid,
    pub anonymous_id: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub author_id: Uuid,
    pub anonymous_id: String,
    pub content: String,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Poll record as the server sends it. In `room_state` it carries the raw
/// `votes` map; in `new_poll` the map is absent (no votes yet).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePoll {
    pub id: Uuid,
    pub room_id: Uuid,
    pub created_by: Uuid,
    pub question: String,
    pub poll_type: PollType,
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub vote_counts: Vec<u32>,
    #[serde(default)]
    pub votes: HashMap<Uuid, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResults {
    pub vote_counts: Vec<u32>,
    pub total_votes: u32,
}
