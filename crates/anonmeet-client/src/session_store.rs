//! Client-local resumable session record.
//!
//! The reconnection credential: which room we were in, whether we own it,
//! and our anonymous handle. Written on create/join, cleared on leave/end,
//! consulted once at startup to resume membership.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use anonmeet_types::models::Room;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub room: Room,
    pub is_owner: bool,
    pub anonymous_id: String,
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the stored record, if any. A corrupt file is removed and treated
    /// as absent.
    pub fn load(&self) -> Option<SessionRecord> {
        let bytes = fs::read(&self.path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("corrupt session record at {}: {}", self.path.display(), e);
                let _ = fs::remove_file(&self.path);
                None
            }
        }
    }

    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        let json = serde_json::to_vec(record)?;
        fs::write(&self.path, json)
            .with_context(|| format!("writing session record to {}", self.path.display()))?;
        Ok(())
    }

    /// Idempotent: clearing an absent record is fine.
    pub fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }
}
