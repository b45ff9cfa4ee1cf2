//! Routes inbound wire events into `RoomState`.
//!
//! Every handler is idempotent under redelivery: aggregate views are applied
//! as upserts keyed by `(subject, user)`, membership events replace the whole
//! list, and messages are guarded by id. Stray events (a vote for a poll we
//! don't know, a reaction for a missing message) are dropped — the next full
//! snapshot corrects any drift.

use tracing::{info, trace, warn};

use anonmeet_types::events::{ServerEvent, WireMember, WirePoll};

use crate::aggregate::{AggregateError, PollTally};
use crate::reconcile;
use crate::state::{PollView, RoomState};

/// Outcome of applying one event.
#[derive(Debug)]
pub enum Applied {
    Ok,
    /// A full snapshot arrived; the caller hands it to the reconciler (which
    /// also reloads message history from the durable store).
    Snapshot {
        members: Vec<WireMember>,
        polls: Vec<WirePoll>,
    },
}

/// Apply one server event to local state. Within a connection, callers apply
/// events in arrival order; across a reconnect the snapshot wins.
pub fn apply(state: &mut RoomState, event: ServerEvent) -> Applied {
    trace!("applying event: {:?}", event);

    match event {
        ServerEvent::RoomState { members, polls } => {
            return Applied::Snapshot { members, polls };
        }

        ServerEvent::NewMessage(msg) => {
            if state.room_id() != Some(msg.room_id) {
                warn!("message {} for a different room, dropping", msg.id);
            } else if state.messages.iter().any(|m| m.id == msg.id) {
                trace!("duplicate message {}, already applied", msg.id);
            } else {
                state.messages.push(msg.into());
            }
        }

        ServerEvent::ReactionUpdate {
            message_id,
            reactions: _,
            user_reactions,
        } => match state.message_mut(message_id) {
            // The per-user map is authoritative; counts are re-derived from
            // it rather than taken from the carried counters.
            Some(msg) => msg.reactions.replace(user_reactions),
            None => warn!("reaction update for unknown message {}, dropping", message_id),
        },

        ServerEvent::NewPoll(poll) => {
            if state.polls.iter().any(|p| p.id == poll.id) {
                trace!("duplicate poll {}, already applied", poll.id);
            } else {
                // Newest first, matching the presentation order.
                let view = poll_view(poll);
                state.polls.insert(0, view);
            }
        }

        ServerEvent::PollVoteUpdate {
            poll_id,
            vote_counts: _,
            total_votes: _,
            user_id,
            option_index,
        } => match state.poll_mut(poll_id) {
            Some(poll) => {
                match poll.tally.apply(user_id, option_index) {
                    Ok(()) => {}
                    Err(AggregateError::PollInactive) => {
                        // Tally frozen at end; late votes are dropped.
                        trace!("vote for ended poll {}, dropping", poll_id);
                    }
                    Err(AggregateError::InvalidOption(idx)) => {
                        warn!("vote for poll {} option {} out of range, dropping", poll_id, idx);
                    }
                }
                // First authoritative update supersedes the optimistic echo.
                poll.pending = false;
            }
            None => warn!("vote update for unknown poll {}, dropping", poll_id),
        },

        ServerEvent::PollEnded {
            poll_id,
            final_results,
        } => match state.poll_mut(poll_id) {
            Some(poll) => {
                poll.tally.end();
                poll.final_results = Some(final_results);
                poll.pending = false;
            }
            None => warn!("poll_ended for unknown poll {}, dropping", poll_id),
        },

        ServerEvent::UserJoined { members } | ServerEvent::UserLeft { members } => {
            if let Some(room_id) = state.room_id() {
                state.members = reconcile::members_from_wire(room_id, &members);
            }
        }

        ServerEvent::MessageError { error }
        | ServerEvent::PollError { error }
        | ServerEvent::VoteError { error } => {
            info!("server rejected an intent: {}", error);
            state.last_error = Some(error);
        }
    }

    Applied::Ok
}

/// Build the local poll view from a wire record, restoring each voter's
/// choice (including the caller's own) from the raw vote map.
pub(crate) fn poll_view(poll: WirePoll) -> PollView {
    let tally = PollTally::from_votes(poll.options.len(), &poll.votes, poll.is_active);
    PollView {
        id: poll.id,
        room_id: poll.room_id,
        created_by: poll.created_by,
        question: poll.question,
        poll_type: poll.poll_type,
        options: poll.options,
        created_at: poll.created_at,
        tally,
        final_results: None,
        pending: false,
    }
}
