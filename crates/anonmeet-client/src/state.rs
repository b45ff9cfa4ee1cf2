use chrono::{DateTime, Utc};
use uuid::Uuid;

use anonmeet_types::events::{FinalResults, WireMessage};
use anonmeet_types::models::{Member, PollType, Room};

use crate::aggregate::{PollTally, ReactionTally};

/// A message plus its derived reaction view.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub id: Uuid,
    pub room_id: Uuid,
    pub author_id: Uuid,
    pub anonymous_id: String,
    pub content: String,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub reactions: ReactionTally,
}

impl From<WireMessage> for MessageView {
    fn from(msg: WireMessage) -> Self {
        Self {
            id: msg.id,
            room_id: msg.room_id,
            author_id: msg.author_id,
            anonymous_id: msg.anonymous_id,
            content: msg.content,
            reply_to: msg.reply_to,
            created_at: msg.created_at,
            reactions: ReactionTally::default(),
        }
    }
}

/// A poll plus its derived vote view.
#[derive(Debug, Clone)]
pub struct PollView {
    pub id: Uuid,
    pub room_id: Uuid,
    pub created_by: Uuid,
    pub question: String,
    pub poll_type: PollType,
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub tally: PollTally,
    /// Server-reported results captured at the ending event. Once set they
    /// win over the locally derived tally.
    pub final_results: Option<FinalResults>,
    /// Provisional marker: set when a local optimistic vote has been applied
    /// and no authoritative update for this poll has arrived yet.
    pub pending: bool,
}

impl PollView {
    pub fn is_active(&self) -> bool {
        self.tally.is_active()
    }

    pub fn vote_counts(&self) -> Vec<u32> {
        match &self.final_results {
            Some(fr) => fr.vote_counts.clone(),
            None => self.tally.counts(),
        }
    }

    pub fn total_votes(&self) -> u32 {
        match &self.final_results {
            Some(fr) => fr.total_votes,
            None => self.tally.total(),
        }
    }

    pub fn user_vote(&self, user_id: Uuid) -> Option<usize> {
        self.tally.vote_of(user_id)
    }
}

/// The single mutable view of the current room. Only `RoomSession` (its
/// owner) writes to it — intent calls and the event pump run in the same
/// task, so mutation is serialized by construction.
#[derive(Debug, Default)]
pub struct RoomState {
    pub room: Option<Room>,
    pub is_owner: bool,
    /// The caller's own membership record.
    pub member: Option<Member>,
    pub members: Vec<Member>,
    pub messages: Vec<MessageView>,
    pub polls: Vec<PollView>,
    /// Most recent server-reported validation error, for display.
    pub last_error: Option<String>,
}

impl RoomState {
    pub fn reset(&mut self, room: Room, is_owner: bool, member: Member) {
        *self = Self {
            room: Some(room),
            is_owner,
            member: Some(member),
            ..Self::default()
        };
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn room_id(&self) -> Option<Uuid> {
        self.room.as_ref().map(|r| r.id)
    }

    pub fn message_mut(&mut self, id: Uuid) -> Option<&mut MessageView> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn poll_mut(&mut self, id: Uuid) -> Option<&mut PollView> {
        self.polls.iter_mut().find(|p| p.id == id)
    }

    pub fn poll(&self, id: Uuid) -> Option<&PollView> {
        self.polls.iter().find(|p| p.id == id)
    }
}
