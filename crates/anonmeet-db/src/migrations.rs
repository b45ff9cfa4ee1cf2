use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS rooms (
            id          TEXT PRIMARY KEY,
            code        TEXT NOT NULL UNIQUE COLLATE NOCASE,
            name        TEXT NOT NULL,
            owner_id    TEXT NOT NULL,
            active      INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS room_members (
            id           TEXT PRIMARY KEY,
            room_id      TEXT NOT NULL REFERENCES rooms(id),
            user_id      TEXT NOT NULL,
            anonymous_id TEXT NOT NULL,
            active       INTEGER NOT NULL DEFAULT 1,
            joined_at    TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(room_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            author_id   TEXT NOT NULL,
            content     TEXT NOT NULL,
            reply_to    TEXT REFERENCES messages(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        CREATE TABLE IF NOT EXISTS message_reactions (
            id            TEXT PRIMARY KEY,
            message_id    TEXT NOT NULL REFERENCES messages(id),
            user_id       TEXT NOT NULL,
            reaction_type TEXT NOT NULL,
            created_at    TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON message_reactions(message_id);

        CREATE TABLE IF NOT EXISTS polls (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            creator_id  TEXT NOT NULL,
            question    TEXT NOT NULL,
            poll_type   TEXT NOT NULL,
            options     TEXT NOT NULL,
            active      INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_polls_room
            ON polls(room_id);

        CREATE TABLE IF NOT EXISTS poll_votes (
            id           TEXT PRIMARY KEY,
            poll_id      TEXT NOT NULL REFERENCES polls(id),
            user_id      TEXT NOT NULL,
            option_index INTEGER NOT NULL,
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(poll_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
