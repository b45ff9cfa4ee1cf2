//! Aligns local state to an authoritative snapshot after a (re)join.
//!
//! The snapshot replaces — never merges with — the local membership and poll
//! collections. Any unconfirmed optimistic state for those collections is
//! deliberately discarded: cardinality must match the server exactly, and
//! replacement bounds the drift a missed-event window can cause. Message
//! history is loaded once from the durable store, oldest first, with
//! reactions folded into per-message tallies.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use anonmeet_db::Database;
use anonmeet_types::events::{WireMember, WirePoll};
use anonmeet_types::models::{Member, PollType};

use crate::aggregate::{PollTally, ReactionTally};
use crate::dispatcher;
use crate::state::{MessageView, PollView, RoomState};

/// Replace membership and poll collections with the snapshot's.
pub fn apply_snapshot(
    state: &mut RoomState,
    members: Vec<WireMember>,
    polls: Vec<WirePoll>,
) {
    let Some(room_id) = state.room_id() else {
        debug!("snapshot with no current room, ignoring");
        return;
    };

    state.members = members_from_wire(room_id, &members);
    state.polls = polls.into_iter().map(dispatcher::poll_view).collect();
}

/// Members as the server reports them; everyone in the snapshot is active.
pub fn members_from_wire(room_id: Uuid, wire: &[WireMember]) -> Vec<Member> {
    wire.iter()
        .map(|m| Member {
            room_id,
            user_id: m.user_id,
            anonymous_id: m.anonymous_id.clone(),
            active: true,
            joined_at: m.joined_at,
        })
        .collect()
}

/// Load full message history for a room from the durable store, reactions
/// folded in. Blocking queries run off the async runtime.
pub async fn load_history(db: &Arc<Database>, room_id: Uuid) -> anyhow::Result<Vec<MessageView>> {
    let db = db.clone();
    let rid = room_id.to_string();

    let (rows, reaction_rows) = tokio::task::spawn_blocking(move || {
        let rows = db.get_messages(&rid)?;
        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = db.get_reactions_for_messages(&message_ids)?;
        anyhow::Ok((rows, reaction_rows))
    })
    .await??;

    // Group reactions by message id; one entry per (message, user) is
    // guaranteed by the store's unique key.
    let mut tallies: HashMap<String, ReactionTally> = HashMap::new();
    for r in reaction_rows {
        let Ok(user_id) = r.user_id.parse::<Uuid>() else {
            warn!("corrupt user_id '{}' on reaction '{}'", r.user_id, r.id);
            continue;
        };
        tallies
            .entry(r.message_id)
            .or_default()
            .apply(user_id, r.reaction_type);
    }

    let messages = rows
        .into_iter()
        .map(|row| {
            let reactions = tallies.remove(&row.id).unwrap_or_default();
            MessageView {
                id: parse_uuid(&row.id, "message id"),
                room_id: parse_uuid(&row.room_id, "room_id"),
                author_id: parse_uuid(&row.author_id, "author_id"),
                anonymous_id: row.author_anonymous_id,
                content: row.content,
                reply_to: row.reply_to.as_deref().map(|s| parse_uuid(s, "reply_to")),
                created_at: parse_timestamp(&row.created_at),
                reactions,
            }
        })
        .collect();

    Ok(messages)
}

/// Active polls for a room from the durable store, raw votes folded into
/// tallies. Pre-populates the poll list on (re)join; the first snapshot
/// replaces it.
pub async fn load_active_polls(
    db: &Arc<Database>,
    room_id: Uuid,
) -> anyhow::Result<Vec<PollView>> {
    let db = db.clone();
    let rid = room_id.to_string();

    let rows = tokio::task::spawn_blocking(move || {
        let polls = db.get_active_polls(&rid)?;
        let mut out = Vec::with_capacity(polls.len());
        for poll in polls {
            let votes = db.get_votes(&poll.id)?;
            out.push((poll, votes));
        }
        anyhow::Ok(out)
    })
    .await??;

    let mut views = Vec::with_capacity(rows.len());
    for (row, votes) in rows {
        let Some(poll_type) = PollType::parse(&row.poll_type) else {
            warn!("unknown poll type '{}' on poll '{}', skipping", row.poll_type, row.id);
            continue;
        };
        let options: Vec<String> = match serde_json::from_str(&row.options) {
            Ok(options) => options,
            Err(e) => {
                warn!("corrupt options on poll '{}': {}, skipping", row.id, e);
                continue;
            }
        };

        let mut raw = HashMap::new();
        for vote in votes {
            let Ok(user_id) = vote.user_id.parse::<Uuid>() else {
                warn!("corrupt user_id '{}' on vote for poll '{}'", vote.user_id, row.id);
                continue;
            };
            raw.insert(user_id, vote.option_index);
        }

        views.push(PollView {
            id: parse_uuid(&row.id, "poll id"),
            room_id,
            created_by: parse_uuid(&row.creator_id, "creator_id"),
            question: row.question,
            poll_type,
            tally: PollTally::from_votes(options.len(), &raw, row.active),
            options,
            created_at: parse_timestamp(&row.created_at),
            final_results: None,
            pending: false,
        });
    }
    Ok(views)
}

fn parse_uuid(s: &str, what: &str) -> Uuid {
    s.parse().unwrap_or_else(|e| {
        warn!("corrupt {} '{}': {}", what, s, e);
        Uuid::default()
    })
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without
            // timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("corrupt timestamp '{}': {}", s, e);
            DateTime::default()
        })
}
