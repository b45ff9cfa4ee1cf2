//! The room session façade.
//!
//! Owns the current `RoomState` and is its single mutator: intent operations
//! (`&mut self`) and the inbound event pump run in the owner's task, so no
//! two handlers ever mutate state concurrently. Network and persistence I/O
//! are async and best-effort; a lost write never appears in the next
//! snapshot and the user retries the intent.

use std::sync::Arc;

use anyhow::anyhow;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use anonmeet_db::Database;
use anonmeet_db::models::{MemberRow, RoomRow};
use anonmeet_types::events::{ClientCommand, ServerEvent};
use anonmeet_types::models::{Member, PollType, Room};

use crate::aggregate::AggregateError;
use crate::config::ClientConfig;
use crate::connection::{ConnectError, ConnectionManager, Connector, WsConnector};
use crate::dispatcher::{self, Applied};
use crate::reconcile;
use crate::session_store::{SessionRecord, SessionStore};
use crate::state::RoomState;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("room not found")]
    RoomNotFound,
    #[error("this room has ended and can no longer be joined")]
    RoomEnded,
    #[error("only the room owner can do that")]
    NotOwner,
    #[error("not an active member of a room")]
    NotMember,
    #[error("poll not found")]
    PollNotFound,
    #[error("poll is no longer active")]
    PollInactive,
    #[error("option index {0} out of range")]
    InvalidOption(usize),
    #[error("a multiple-choice poll needs at least two options")]
    InvalidOptions,
    #[error("reply target not found in this room")]
    ReplyNotFound,
    #[error("connection failed: {0}")]
    Connection(#[from] ConnectError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<AggregateError> for SessionError {
    fn from(e: AggregateError) -> Self {
        match e {
            AggregateError::PollInactive => Self::PollInactive,
            AggregateError::InvalidOption(idx) => Self::InvalidOption(idx),
        }
    }
}

pub struct RoomSession<C: Connector> {
    /// Identity issued by the external provider; operations fail
    /// `NotAuthenticated` without one.
    user_id: Option<Uuid>,
    db: Arc<Database>,
    conn: ConnectionManager<C>,
    store: SessionStore,
    state: RoomState,
}

impl RoomSession<WsConnector> {
    /// Open the durable store at the configured path and wire up the
    /// production WebSocket connector.
    pub fn from_config(
        config: &ClientConfig,
        user_id: Option<Uuid>,
    ) -> Result<Self, SessionError> {
        let db = Arc::new(Database::open(&config.db_path)?);
        Ok(Self::new(config, db, WsConnector, user_id))
    }
}

impl<C: Connector> RoomSession<C> {
    pub fn new(
        config: &ClientConfig,
        db: Arc<Database>,
        connector: C,
        user_id: Option<Uuid>,
    ) -> Self {
        Self {
            user_id,
            db,
            conn: ConnectionManager::new(
                connector,
                config.gateway_url.clone(),
                config.base_delay,
                config.max_attempts,
            ),
            store: SessionStore::new(config.session_path.clone()),
            state: RoomState::default(),
        }
    }

    pub fn state(&self) -> &RoomState {
        &self.state
    }

    // -- Lifecycle intents --

    /// Create a room, register the caller as owner and first member, and
    /// establish channel membership.
    pub async fn create_room(&mut self, name: &str) -> Result<Room, SessionError> {
        let user_id = self.user_id.ok_or(SessionError::NotAuthenticated)?;

        let room_id = Uuid::new_v4();
        let code = generate_room_code();
        let anonymous_id = generate_anonymous_id();
        let now = chrono::Utc::now();

        let (rid, code2, name2, uid, anon) = (
            room_id.to_string(),
            code.clone(),
            name.to_string(),
            user_id.to_string(),
            anonymous_id.clone(),
        );
        blocking(&self.db, move |db| {
            db.create_room(&rid, &code2, &name2, &uid)?;
            db.insert_member(&Uuid::new_v4().to_string(), &rid, &uid, &anon)
        })
        .await?;

        self.conn.connect().await?;
        self.conn.send(ClientCommand::JoinRoom {
            room_id,
            user_id,
            anonymous_id: anonymous_id.clone(),
        });

        let room = Room {
            id: room_id,
            code,
            name: name.to_string(),
            owner_id: user_id,
            active: true,
            created_at: now,
        };
        let member = Member {
            room_id,
            user_id,
            anonymous_id: anonymous_id.clone(),
            active: true,
            joined_at: now,
        };
        self.state.reset(room.clone(), true, member);
        self.store.save(&SessionRecord {
            room: room.clone(),
            is_owner: true,
            anonymous_id,
        })?;

        info!("created room {} ({})", room.code, room.id);
        Ok(room)
    }

    /// Join by code. A returning user reactivates their member row and keeps
    /// the same anonymous handle — identity continuity across rejoins.
    pub async fn join_room(&mut self, code: &str) -> Result<Room, SessionError> {
        let user_id = self.user_id.ok_or(SessionError::NotAuthenticated)?;
        let code = code.trim().to_ascii_uppercase();

        let lookup = code.clone();
        let room_row = blocking(&self.db, move |db| db.get_room_by_code(&lookup))
            .await?
            .ok_or(SessionError::RoomNotFound)?;
        if !room_row.active {
            return Err(SessionError::RoomEnded);
        }
        let room = room_from_row(&room_row)?;

        let (rid, uid) = (room.id.to_string(), user_id.to_string());
        let existing = blocking(&self.db, {
            let (rid, uid) = (rid.clone(), uid.clone());
            move |db| db.get_member(&rid, &uid)
        })
        .await?;

        let member = match existing {
            Some(row) => {
                blocking(&self.db, {
                    let (rid, uid) = (rid.clone(), uid.clone());
                    move |db| db.set_member_active(&rid, &uid, true)
                })
                .await?;
                let mut member = member_from_row(&row)?;
                member.active = true;
                member
            }
            None => {
                let anonymous_id = generate_anonymous_id();
                let anon = anonymous_id.clone();
                blocking(&self.db, move |db| {
                    db.insert_member(&Uuid::new_v4().to_string(), &rid, &uid, &anon)
                })
                .await?;
                Member {
                    room_id: room.id,
                    user_id,
                    anonymous_id,
                    active: true,
                    joined_at: chrono::Utc::now(),
                }
            }
        };

        self.conn.connect().await?;
        self.conn.send(ClientCommand::JoinRoom {
            room_id: room.id,
            user_id,
            anonymous_id: member.anonymous_id.clone(),
        });

        let is_owner = room.owner_id == user_id;
        self.store.save(&SessionRecord {
            room: room.clone(),
            is_owner,
            anonymous_id: member.anonymous_id.clone(),
        })?;
        self.state.reset(room.clone(), is_owner, member);

        // Pre-populate from the durable store; the join snapshot replaces
        // the poll list when it arrives.
        self.state.polls = reconcile::load_active_polls(&self.db, room.id).await?;
        self.state.messages = reconcile::load_history(&self.db, room.id).await?;

        info!("joined room {} ({})", room.code, room.id);
        Ok(room)
    }

    /// Idempotent: a no-op when the caller has already left.
    pub async fn leave_room(&mut self) -> Result<(), SessionError> {
        let (Some(user_id), Some(room), Some(member)) = (
            self.user_id,
            self.state.room.clone(),
            self.state.member.clone(),
        ) else {
            return Ok(());
        };

        let (rid, uid) = (room.id.to_string(), user_id.to_string());
        blocking(&self.db, move |db| db.set_member_active(&rid, &uid, false)).await?;

        self.conn.send(ClientCommand::LeaveRoom {
            room_id: room.id,
            user_id,
            anonymous_id: member.anonymous_id,
        });
        // The queued command still drains before the writer task exits.
        self.conn.disconnect();

        self.state.clear();
        self.store.clear();
        Ok(())
    }

    /// Owner-only, terminal: deactivates the room and every member.
    pub async fn end_room(&mut self) -> Result<(), SessionError> {
        let user_id = self.user_id.ok_or(SessionError::NotAuthenticated)?;
        let room = self.state.room.clone().ok_or(SessionError::NotMember)?;
        if !self.state.is_owner {
            return Err(SessionError::NotOwner);
        }
        let member = self.state.member.clone().ok_or(SessionError::NotMember)?;

        let rid = room.id.to_string();
        blocking(&self.db, move |db| db.end_room(&rid)).await?;

        self.conn.send(ClientCommand::LeaveRoom {
            room_id: room.id,
            user_id,
            anonymous_id: member.anonymous_id,
        });
        self.conn.disconnect();

        info!("ended room {} ({})", room.code, room.id);
        self.state.clear();
        self.store.clear();
        Ok(())
    }

    // -- Room intents --

    /// Transmit and persist concurrently (best-effort dual write). The local
    /// echo arrives via the server's `new_message` broadcast.
    pub async fn send_message(
        &mut self,
        content: &str,
        reply_to: Option<Uuid>,
    ) -> Result<(), SessionError> {
        let (user_id, room, member) = self.require_membership()?;
        self.ensure_room_active(room.id).await?;

        if let Some(target) = reply_to {
            if !self.state.messages.iter().any(|m| m.id == target) {
                return Err(SessionError::ReplyNotFound);
            }
        }

        self.conn.send(ClientCommand::SendMessage {
            room_id: room.id,
            user_id,
            content: content.to_string(),
            anonymous_id: member.anonymous_id,
            reply_to,
        });

        let (rid, uid, body, reply) = (
            room.id.to_string(),
            user_id.to_string(),
            content.to_string(),
            reply_to.map(|id| id.to_string()),
        );
        self.persist_detached("message", move |db| {
            db.insert_message(&Uuid::new_v4().to_string(), &rid, &uid, &body, reply.as_deref())
        });

        Ok(())
    }

    /// Upsert reaction: at most one per user per message, latest type wins.
    /// Transmit-only; the tally is derived state, persisted by the server.
    pub fn add_reaction(&mut self, message_id: Uuid, reaction_type: &str) -> Result<(), SessionError> {
        let (user_id, room, member) = self.require_membership()?;

        self.conn.send(ClientCommand::AddReaction {
            room_id: room.id,
            message_id,
            user_id,
            reaction_type: reaction_type.to_string(),
            anonymous_id: member.anonymous_id,
        });

        // Optimistic echo; the next reaction_update replaces the whole map.
        if let Some(msg) = self.state.message_mut(message_id) {
            msg.reactions.apply(user_id, reaction_type.to_string());
        }
        Ok(())
    }

    /// For yes/no polls the options are forced to `["Yes", "No"]` regardless
    /// of caller input.
    pub async fn create_poll(
        &mut self,
        question: &str,
        poll_type: PollType,
        options: Vec<String>,
    ) -> Result<(), SessionError> {
        let (user_id, room, member) = self.require_membership()?;
        self.ensure_room_active(room.id).await?;

        let options = match poll_type {
            PollType::YesNo => vec!["Yes".to_string(), "No".to_string()],
            PollType::MultipleChoice => {
                if options.len() < 2 {
                    return Err(SessionError::InvalidOptions);
                }
                options
            }
        };

        self.conn.send(ClientCommand::CreatePoll {
            room_id: room.id,
            user_id,
            question: question.to_string(),
            poll_type,
            options: options.clone(),
            anonymous_id: member.anonymous_id,
        });

        let (rid, uid, q) = (room.id.to_string(), user_id.to_string(), question.to_string());
        self.persist_detached("poll", move |db| {
            let options_json = serde_json::to_string(&options)?;
            db.insert_poll(
                &Uuid::new_v4().to_string(),
                &rid,
                &uid,
                &q,
                poll_type.as_str(),
                &options_json,
            )
        });

        Ok(())
    }

    /// Upsert vote: re-voting moves the caller's option, never adds a voter.
    /// Applied optimistically and marked pending until the first
    /// authoritative update for this poll supersedes it.
    pub async fn vote_poll(&mut self, poll_id: Uuid, option_index: usize) -> Result<(), SessionError> {
        let (user_id, room, member) = self.require_membership()?;
        self.ensure_room_active(room.id).await?;

        let poll = self
            .state
            .poll_mut(poll_id)
            .ok_or(SessionError::PollNotFound)?;
        poll.tally.apply(user_id, option_index)?;
        poll.pending = true;

        self.conn.send(ClientCommand::VotePoll {
            room_id: room.id,
            poll_id,
            user_id,
            option_index,
            anonymous_id: member.anonymous_id,
        });

        let (pid, uid) = (poll_id.to_string(), user_id.to_string());
        self.persist_detached("vote", move |db| {
            db.upsert_vote(&Uuid::new_v4().to_string(), &pid, &uid, option_index)
        });

        Ok(())
    }

    /// Any member may request; the server is authoritative on permission.
    /// The only local gate is that the poll is still active.
    pub fn end_poll(&mut self, poll_id: Uuid) -> Result<(), SessionError> {
        let (user_id, room, _member) = self.require_membership()?;

        let poll = self.state.poll(poll_id).ok_or(SessionError::PollNotFound)?;
        if !poll.is_active() {
            return Err(SessionError::PollInactive);
        }

        self.conn.send(ClientCommand::EndPoll {
            room_id: room.id,
            poll_id,
            user_id,
        });

        let pid = poll_id.to_string();
        self.persist_detached("poll end", move |db| db.end_poll(&pid));

        Ok(())
    }

    // -- Resumption and event pumping --

    /// Consult the persisted session record once at startup. A record whose
    /// membership the store no longer reports as active is discarded and the
    /// caller is treated as logged out of that room.
    pub async fn resume(&mut self) -> Result<Option<Room>, SessionError> {
        let Some(user_id) = self.user_id else {
            return Ok(None);
        };
        let Some(record) = self.store.load() else {
            return Ok(None);
        };

        let (rid, uid) = (record.room.id.to_string(), user_id.to_string());
        let member_row = blocking(&self.db, move |db| db.get_member(&rid, &uid)).await?;

        let member = match member_row {
            Some(row) if row.active => member_from_row(&row)?,
            _ => {
                info!("stored session for room {} is stale, discarding", record.room.id);
                self.store.clear();
                return Ok(None);
            }
        };

        self.conn.connect().await?;
        self.conn.send(ClientCommand::JoinRoom {
            room_id: record.room.id,
            user_id,
            anonymous_id: record.anonymous_id.clone(),
        });

        let room = record.room.clone();
        self.state.reset(room.clone(), record.is_owner, member);
        self.state.polls = reconcile::load_active_polls(&self.db, room.id).await?;
        self.state.messages = reconcile::load_history(&self.db, room.id).await?;

        info!("resumed session in room {} ({})", room.code, room.id);
        Ok(Some(room))
    }

    /// Apply one inbound event. Snapshots are handed to the reconciler,
    /// which also reloads message history from the durable store.
    pub async fn pump(&mut self, event: ServerEvent) -> Result<(), SessionError> {
        match dispatcher::apply(&mut self.state, event) {
            Applied::Ok => Ok(()),
            Applied::Snapshot { members, polls } => {
                let Some(room_id) = self.state.room_id() else {
                    debug!("snapshot with no current room, ignoring");
                    return Ok(());
                };
                reconcile::apply_snapshot(&mut self.state, members, polls);

                let history = reconcile::load_history(&self.db, room_id).await?;
                // Stale-write guard: drop the result if the session has
                // moved on to a different room since the load started.
                if self.state.room_id() == Some(room_id) {
                    self.state.messages = history;
                } else {
                    debug!("history load for {} arrived after room change, discarding", room_id);
                }
                Ok(())
            }
        }
    }

    /// Drive the receive loop. On transport loss, reconnects and re-sends
    /// the join intent; the next snapshot reconciles whatever was missed.
    /// Returns when there is no room to stay connected for, or when the
    /// retry budget is exhausted.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        loop {
            match self.conn.recv().await {
                Some(event) => self.pump(event).await?,
                None => {
                    let (Some(user_id), Some(room), Some(member)) = (
                        self.user_id,
                        self.state.room.clone(),
                        self.state.member.clone(),
                    ) else {
                        return Ok(());
                    };

                    warn!("channel lost, reconnecting to room {}", room.id);
                    self.conn.connect().await?;
                    self.conn.send(ClientCommand::JoinRoom {
                        room_id: room.id,
                        user_id,
                        anonymous_id: member.anonymous_id,
                    });
                }
            }
        }
    }

    /// The durable store is authoritative for room liveness: a write to an
    /// ended room is a validation failure, not a transient one. Gates every
    /// intent that transmits and persists (messages, polls, votes).
    async fn ensure_room_active(&self, room_id: Uuid) -> Result<(), SessionError> {
        let rid = room_id.to_string();
        let current = blocking(&self.db, move |db| db.get_room(&rid))
            .await?
            .ok_or(SessionError::RoomNotFound)?;
        if !current.active {
            return Err(SessionError::RoomEnded);
        }
        Ok(())
    }

    fn require_membership(&self) -> Result<(Uuid, Room, Member), SessionError> {
        let user_id = self.user_id.ok_or(SessionError::NotAuthenticated)?;
        let room = self.state.room.clone().ok_or(SessionError::NotMember)?;
        let member = self.state.member.clone().ok_or(SessionError::NotMember)?;
        if !member.active {
            return Err(SessionError::NotMember);
        }
        Ok((user_id, room, member))
    }

    /// Fire-and-forget durable write. A failure is logged and left for the
    /// next snapshot reconciliation to surface as a missing record.
    fn persist_detached(
        &self,
        what: &'static str,
        f: impl FnOnce(&Database) -> anyhow::Result<()> + Send + 'static,
    ) {
        let db = self.db.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || f(&db)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{} write failed, lost until next reconciliation: {:#}", what, e),
                Err(e) => warn!("{} write task failed: {}", what, e),
            }
        });
    }
}

/// Run a blocking store query off the async runtime.
async fn blocking<T, F>(db: &Arc<Database>, f: F) -> Result<T, SessionError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| SessionError::Store(anyhow!("store task failed: {}", e)))?
        .map_err(SessionError::Store)
}

const ID_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn random_chars(count: usize) -> String {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| ID_CHARS[rng.random_range(0..ID_CHARS.len())] as char)
        .collect()
}

/// Six alphanumeric characters, unique case-insensitively (stored upper).
fn generate_room_code() -> String {
    random_chars(6)
}

/// Display handle of the form `Anon#XXXX`.
fn generate_anonymous_id() -> String {
    format!("Anon#{}", random_chars(4))
}

fn room_from_row(row: &RoomRow) -> Result<Room, SessionError> {
    Ok(Room {
        id: parse_id(&row.id)?,
        code: row.code.clone(),
        name: row.name.clone(),
        owner_id: parse_id(&row.owner_id)?,
        active: row.active,
        created_at: reconcile::parse_timestamp(&row.created_at),
    })
}

fn member_from_row(row: &MemberRow) -> Result<Member, SessionError> {
    Ok(Member {
        room_id: parse_id(&row.room_id)?,
        user_id: parse_id(&row.user_id)?,
        anonymous_id: row.anonymous_id.clone(),
        active: row.active,
        joined_at: reconcile::parse_timestamp(&row.joined_at),
    })
}

fn parse_id(s: &str) -> Result<Uuid, SessionError> {
    s.parse()
        .map_err(|e| SessionError::Store(anyhow!("corrupt id '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Utc;
    use tokio::sync::mpsc;

    use anonmeet_types::events::{WireMember, WirePoll};

    use crate::connection::Channel;

    use super::*;

    /// Test connector: every dial hands the remote ends to the harness so
    /// tests can inject events and inspect outbound commands.
    #[derive(Clone, Default)]
    struct TestConnector {
        remote: Arc<Mutex<Option<Remote>>>,
    }

    struct Remote {
        events: mpsc::UnboundedSender<ServerEvent>,
        commands: mpsc::UnboundedReceiver<ClientCommand>,
    }

    impl Connector for TestConnector {
        async fn connect(&mut self, _url: &str) -> anyhow::Result<Channel> {
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            *self.remote.lock().unwrap() = Some(Remote {
                events: event_tx,
                commands: cmd_rx,
            });
            Ok(Channel {
                tx: cmd_tx,
                rx: event_rx,
            })
        }
    }

    impl TestConnector {
        fn next_command(&self) -> Option<ClientCommand> {
            self.remote
                .lock()
                .unwrap()
                .as_mut()
                .and_then(|r| r.commands.try_recv().ok())
        }
    }

    fn uid(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    fn test_config() -> ClientConfig {
        ClientConfig {
            session_path: std::env::temp_dir()
                .join(format!("anonmeet-test-{}.json", Uuid::new_v4())),
            ..ClientConfig::default()
        }
    }

    fn session(
        db: &Arc<Database>,
        config: &ClientConfig,
        user: Uuid,
    ) -> (RoomSession<TestConnector>, TestConnector) {
        let connector = TestConnector::default();
        let session = RoomSession::new(config, db.clone(), connector.clone(), Some(user));
        (session, connector)
    }

    fn wire_poll(id: Uuid, room_id: Uuid, active: bool) -> WirePoll {
        WirePoll {
            id,
            room_id,
            created_by: uid(1),
            question: "Lunch?".into(),
            poll_type: PollType::YesNo,
            options: vec!["Yes".into(), "No".into()],
            created_at: Utc::now(),
            is_active: active,
            vote_counts: vec![],
            votes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn create_room_registers_owner_and_joins_channel() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = test_config();
        let (mut s1, remote) = session(&db, &config, uid(1));

        let room = s1.create_room("standup").await.unwrap();

        assert_eq!(room.code.len(), 6);
        assert!(s1.state().is_owner);
        let member = db
            .get_member(&room.id.to_string(), &uid(1).to_string())
            .unwrap()
            .unwrap();
        assert!(member.active);
        assert!(member.anonymous_id.starts_with("Anon#"));
        assert!(matches!(
            remote.next_command(),
            Some(ClientCommand::JoinRoom { .. })
        ));

        s1.store.clear();
    }

    #[test]
    fn from_config_opens_the_store_at_the_configured_path() {
        let mut config = test_config();
        config.db_path =
            std::env::temp_dir().join(format!("anonmeet-test-{}.db", Uuid::new_v4()));

        let session = RoomSession::from_config(&config, Some(uid(1))).unwrap();

        assert!(config.db_path.exists());
        assert!(session.state().room.is_none());
        let _ = std::fs::remove_file(&config.db_path);
    }

    #[tokio::test]
    async fn unauthenticated_create_fails_fast() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = test_config();
        let connector = TestConnector::default();
        let mut s = RoomSession::new(&config, db, connector, None);

        assert!(matches!(
            s.create_room("standup").await,
            Err(SessionError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn join_validates_code_and_liveness() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let c1 = test_config();
        let (mut owner, _) = session(&db, &c1, uid(1));
        let room = owner.create_room("standup").await.unwrap();

        let c2 = test_config();
        let (mut guest, _) = session(&db, &c2, uid(2));
        assert!(matches!(
            guest.join_room("NOSUCH").await,
            Err(SessionError::RoomNotFound)
        ));

        // Codes match case-insensitively.
        let joined = guest.join_room(&room.code.to_lowercase()).await.unwrap();
        assert_eq!(joined.id, room.id);
        assert!(!guest.state().is_owner);

        owner.end_room().await.unwrap();
        let c3 = test_config();
        let (mut late, _) = session(&db, &c3, uid(3));
        assert!(matches!(
            late.join_room(&room.code).await,
            Err(SessionError::RoomEnded)
        ));

        guest.store.clear();
    }

    #[tokio::test]
    async fn rejoin_reuses_anonymous_id() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let c1 = test_config();
        let (mut owner, _) = session(&db, &c1, uid(1));
        let room = owner.create_room("standup").await.unwrap();

        let c2 = test_config();
        let (mut guest, _) = session(&db, &c2, uid(2));
        guest.join_room(&room.code).await.unwrap();
        let first = guest.state().member.as_ref().unwrap().anonymous_id.clone();

        guest.leave_room().await.unwrap();
        assert!(guest.state().room.is_none());

        guest.join_room(&room.code).await.unwrap();
        let second = guest.state().member.as_ref().unwrap().anonymous_id.clone();
        assert_eq!(first, second);

        owner.store.clear();
        guest.store.clear();
    }

    #[tokio::test]
    async fn leave_room_is_idempotent() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = test_config();
        let (mut s, _) = session(&db, &config, uid(1));

        s.leave_room().await.unwrap();
        s.create_room("standup").await.unwrap();
        s.leave_room().await.unwrap();
        s.leave_room().await.unwrap();
        assert!(s.state().room.is_none());
    }

    #[tokio::test]
    async fn end_room_is_owner_only() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let c1 = test_config();
        let (mut owner, _) = session(&db, &c1, uid(1));
        let room = owner.create_room("standup").await.unwrap();

        let c2 = test_config();
        let (mut guest, _) = session(&db, &c2, uid(2));
        guest.join_room(&room.code).await.unwrap();

        assert!(matches!(
            guest.end_room().await,
            Err(SessionError::NotOwner)
        ));

        owner.end_room().await.unwrap();
        assert!(!db.get_room(&room.id.to_string()).unwrap().unwrap().active);

        guest.store.clear();
    }

    #[tokio::test]
    async fn message_to_ended_room_is_rejected_and_not_appended() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let c1 = test_config();
        let (mut owner, _) = session(&db, &c1, uid(1));
        let room = owner.create_room("standup").await.unwrap();

        let c2 = test_config();
        let (mut guest, _) = session(&db, &c2, uid(2));
        guest.join_room(&room.code).await.unwrap();

        owner.end_room().await.unwrap();

        assert!(matches!(
            guest.send_message("too late", None).await,
            Err(SessionError::RoomEnded)
        ));
        assert!(guest.state().messages.is_empty());
        assert!(db.get_messages(&room.id.to_string()).unwrap().is_empty());

        guest.store.clear();
    }

    #[tokio::test]
    async fn poll_and_vote_writes_to_ended_room_are_rejected() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let c1 = test_config();
        let (mut owner, _) = session(&db, &c1, uid(1));
        let room = owner.create_room("standup").await.unwrap();

        let c2 = test_config();
        let (mut guest, _) = session(&db, &c2, uid(2));
        guest.join_room(&room.code).await.unwrap();

        // The guest still knows a live poll locally when the room ends.
        let poll_id = uid(30);
        guest
            .pump(ServerEvent::NewPoll(wire_poll(poll_id, room.id, true)))
            .await
            .unwrap();

        owner.end_room().await.unwrap();

        assert!(matches!(
            guest.create_poll("Too late?", PollType::YesNo, vec![]).await,
            Err(SessionError::RoomEnded)
        ));
        assert!(matches!(
            guest.vote_poll(poll_id, 0).await,
            Err(SessionError::RoomEnded)
        ));

        // Nothing was transmitted optimistically or persisted.
        assert_eq!(guest.state().poll(poll_id).unwrap().total_votes(), 0);
        assert!(db.get_active_polls(&room.id.to_string()).unwrap().is_empty());
        assert!(db.get_votes(&poll_id.to_string()).unwrap().is_empty());

        guest.store.clear();
    }

    #[tokio::test]
    async fn yesno_poll_forces_options() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = test_config();
        let (mut s, remote) = session(&db, &config, uid(1));
        s.create_room("standup").await.unwrap();
        let _join = remote.next_command();

        s.create_poll("Lunch?", PollType::YesNo, vec!["Pizza".into(), "Sushi".into(), "Salad".into()])
            .await
            .unwrap();

        let Some(ClientCommand::CreatePoll { options, .. }) = remote.next_command() else {
            panic!("expected create_poll command");
        };
        assert_eq!(options, vec!["Yes".to_string(), "No".to_string()]);

        s.store.clear();
    }

    #[tokio::test]
    async fn multiple_choice_poll_needs_options() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = test_config();
        let (mut s, _) = session(&db, &config, uid(1));
        s.create_room("standup").await.unwrap();

        assert!(matches!(
            s.create_poll("Lunch?", PollType::MultipleChoice, vec!["Only one".into()])
                .await,
            Err(SessionError::InvalidOptions)
        ));

        s.store.clear();
    }

    /// The full poll scenario: vote optimistically, then reconnect and have
    /// the snapshot restore both the counts and the caller's own choice.
    #[tokio::test]
    async fn vote_survives_reconnect_via_snapshot() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let c1 = test_config();
        let (mut owner, _) = session(&db, &c1, uid(1));
        let room = owner.create_room("standup").await.unwrap();

        let c2 = test_config();
        let (mut guest, _) = session(&db, &c2, uid(2));
        guest.join_room(&room.code).await.unwrap();

        let poll_id = uid(30);
        guest
            .pump(ServerEvent::NewPoll(wire_poll(poll_id, room.id, true)))
            .await
            .unwrap();

        guest.vote_poll(poll_id, 0).await.unwrap();
        {
            let poll = guest.state().poll(poll_id).unwrap();
            assert_eq!(poll.vote_counts(), vec![1, 0]);
            assert_eq!(poll.total_votes(), 1);
            assert!(poll.pending);
        }

        // Reconnection snapshot carries the raw vote map.
        let mut votes = HashMap::new();
        votes.insert(uid(2), 0usize);
        let mut snapshot_poll = wire_poll(poll_id, room.id, true);
        snapshot_poll.vote_counts = vec![1, 0];
        snapshot_poll.votes = votes;
        guest
            .pump(ServerEvent::RoomState {
                members: vec![WireMember {
                    user_id: uid(2),
                    anonymous_id: "Anon#7Q2K".into(),
                    joined_at: Utc::now(),
                }],
                polls: vec![snapshot_poll],
            })
            .await
            .unwrap();

        let poll = guest.state().poll(poll_id).unwrap();
        assert_eq!(poll.vote_counts(), vec![1, 0]);
        assert_eq!(poll.total_votes(), 1);
        assert_eq!(poll.user_vote(uid(2)), Some(0));
        assert!(!poll.pending);

        owner.store.clear();
        guest.store.clear();
    }

    #[tokio::test]
    async fn voting_on_ended_poll_fails_locally() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = test_config();
        let (mut s, _) = session(&db, &config, uid(1));
        let room = s.create_room("standup").await.unwrap();

        s.pump(ServerEvent::NewPoll(wire_poll(uid(30), room.id, false)))
            .await
            .unwrap();

        assert!(matches!(
            s.vote_poll(uid(30), 0).await,
            Err(SessionError::PollInactive)
        ));
        assert!(matches!(
            s.end_poll(uid(30)),
            Err(SessionError::PollInactive)
        ));
        assert!(matches!(
            s.vote_poll(uid(99), 0).await,
            Err(SessionError::PollNotFound)
        ));

        s.store.clear();
    }

    #[tokio::test]
    async fn snapshot_reload_pulls_history_from_store() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = test_config();
        let (mut s, _) = session(&db, &config, uid(1));
        let room = s.create_room("standup").await.unwrap();

        db.insert_message(
            &Uuid::new_v4().to_string(),
            &room.id.to_string(),
            &uid(1).to_string(),
            "hello",
            None,
        )
        .unwrap();

        s.pump(ServerEvent::RoomState {
            members: vec![],
            polls: vec![],
        })
        .await
        .unwrap();

        assert_eq!(s.state().messages.len(), 1);
        assert_eq!(s.state().messages[0].content, "hello");

        s.store.clear();
    }

    #[tokio::test]
    async fn resume_restores_active_membership() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = test_config();
        let (mut s, _) = session(&db, &config, uid(1));
        let room = s.create_room("standup").await.unwrap();

        // Fresh process, same session file.
        let (mut restarted, remote) = session(&db, &config, uid(1));
        let resumed = restarted.resume().await.unwrap().unwrap();

        assert_eq!(resumed.id, room.id);
        assert!(restarted.state().is_owner);
        assert_eq!(
            restarted.state().member.as_ref().unwrap().anonymous_id,
            s.state().member.as_ref().unwrap().anonymous_id
        );
        assert!(matches!(
            remote.next_command(),
            Some(ClientCommand::JoinRoom { .. })
        ));

        restarted.store.clear();
    }

    #[tokio::test]
    async fn resume_discards_stale_session() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = test_config();
        let (mut s, _) = session(&db, &config, uid(1));
        let room = s.create_room("standup").await.unwrap();

        // Membership deactivated behind our back (room ended elsewhere).
        db.end_room(&room.id.to_string()).unwrap();

        let (mut restarted, _) = session(&db, &config, uid(1));
        assert!(restarted.resume().await.unwrap().is_none());
        assert!(restarted.store.load().is_none());
    }
}
