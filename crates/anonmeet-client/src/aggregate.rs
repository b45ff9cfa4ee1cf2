//! Derived tallies, recomputed from per-user upserts.
//!
//! Counters are never incremented in place: every vote or reaction event is
//! an upsert keyed by `(subject, user)`, and the counts are derived from the
//! raw map. Duplicate delivery of the same event is therefore a no-op, and
//! at-most-one-per-user holds by construction.

use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("poll is no longer active")]
    PollInactive,
    #[error("option index {0} out of range")]
    InvalidOption(usize),
}

/// Vote state for one poll: the raw per-user vote map plus the active flag.
/// The tally is the enforcement point for "no votes after end" — the channel
/// itself does not gate late votes.
#[derive(Debug, Clone)]
pub struct PollTally {
    votes: HashMap<Uuid, usize>,
    option_count: usize,
    active: bool,
}

impl PollTally {
    pub fn new(option_count: usize) -> Self {
        Self {
            votes: HashMap::new(),
            option_count,
            active: true,
        }
    }

    /// Rebuild from a snapshot's raw vote map. Entries pointing at options
    /// that don't exist are stray data and are dropped.
    pub fn from_votes(option_count: usize, raw: &HashMap<Uuid, usize>, active: bool) -> Self {
        let votes = raw
            .iter()
            .filter(|&(_, &idx)| idx < option_count)
            .map(|(&user, &idx)| (user, idx))
            .collect();
        Self {
            votes,
            option_count,
            active,
        }
    }

    /// Upsert one user's vote. A re-vote moves the counted option; it never
    /// adds a voter.
    pub fn apply(&mut self, user_id: Uuid, option_index: usize) -> Result<(), AggregateError> {
        if !self.active {
            return Err(AggregateError::PollInactive);
        }
        if option_index >= self.option_count {
            return Err(AggregateError::InvalidOption(option_index));
        }
        self.votes.insert(user_id, option_index);
        Ok(())
    }

    /// Freeze the tally. Subsequent `apply` calls fail `PollInactive`.
    pub fn end(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Per-option counts, aligned with the poll's option order.
    pub fn counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.option_count];
        for &idx in self.votes.values() {
            counts[idx] += 1;
        }
        counts
    }

    /// Number of distinct voters.
    pub fn total(&self) -> u32 {
        self.votes.len() as u32
    }

    pub fn vote_of(&self, user_id: Uuid) -> Option<usize> {
        self.votes.get(&user_id).copied()
    }
}

/// Reaction state for one message: the raw per-user reaction map.
/// No active/inactive gate — messages don't expire.
#[derive(Debug, Clone, Default)]
pub struct ReactionTally {
    by_user: HashMap<Uuid, String>,
}

impl ReactionTally {
    /// Upsert one user's reaction; the latest type wins.
    pub fn apply(&mut self, user_id: Uuid, reaction_type: String) {
        self.by_user.insert(user_id, reaction_type);
    }

    /// Replace the whole map from an authoritative `user_reactions` payload.
    pub fn replace(&mut self, by_user: HashMap<Uuid, String>) {
        self.by_user = by_user;
    }

    pub fn counts(&self) -> HashMap<String, u32> {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for ty in self.by_user.values() {
            *counts.entry(ty.clone()).or_default() += 1;
        }
        counts
    }

    pub fn reaction_of(&self, user_id: Uuid) -> Option<&str> {
        self.by_user.get(&user_id).map(String::as_str)
    }
}
