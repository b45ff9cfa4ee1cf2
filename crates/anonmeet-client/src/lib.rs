//! Real-time room synchronization engine.
//!
//! Holds a consistent local view of an ephemeral chat room — membership,
//! messages, reactions, live polls — across a lossy bidirectional channel.
//! Inbound events are applied idempotently, a full snapshot replaces local
//! collections on every (re)join, and derived tallies are recomputed from
//! per-user upserts so redelivery can never double-count.

pub mod aggregate;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod reconcile;
pub mod session;
pub mod session_store;
pub mod state;

pub use config::ClientConfig;
pub use connection::{Channel, ConnState, ConnectError, ConnectionManager, Connector, WsConnector};
pub use session::{RoomSession, SessionError};
pub use session_store::{SessionRecord, SessionStore};
pub use state::{MessageView, PollView, RoomState};
