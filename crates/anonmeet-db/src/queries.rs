use crate::Database;
use crate::models::{MemberRow, MessageRow, PollRow, ReactionRow, RoomRow, VoteRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Rooms --

    pub fn create_room(&self, id: &str, code: &str, name: &str, owner_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, code, name, owner_id) VALUES (?1, ?2, ?3, ?4)",
                (id, code, name, owner_id),
            )?;
            Ok(())
        })
    }

    pub fn get_room(&self, id: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_room(conn, "id = ?1", id))
    }

    /// Room codes are unique case-insensitively; lookup matches either case.
    pub fn get_room_by_code(&self, code: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_room(conn, "code = ?1 COLLATE NOCASE", code))
    }

    /// Terminal: deactivates the room and every member in one locked pass.
    pub fn end_room(&self, room_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE rooms SET active = 0 WHERE id = ?1", [room_id])?;
            conn.execute(
                "UPDATE room_members SET active = 0 WHERE room_id = ?1",
                [room_id],
            )?;
            Ok(())
        })
    }

    // -- Members --

    pub fn get_member(&self, room_id: &str, user_id: &str) -> Result<Option<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, user_id, anonymous_id, active, joined_at
                 FROM room_members WHERE room_id = ?1 AND user_id = ?2",
            )?;

            let row = stmt
                .query_row([room_id, user_id], |row| {
                    Ok(MemberRow {
                        id: row.get(0)?,
                        room_id: row.get(1)?,
                        user_id: row.get(2)?,
                        anonymous_id: row.get(3)?,
                        active: row.get(4)?,
                        joined_at: row.get(5)?,
                    })
                })
                .optional()?;

            Ok(row)
        })
    }

    pub fn insert_member(
        &self,
        id: &str,
        room_id: &str,
        user_id: &str,
        anonymous_id: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO room_members (id, room_id, user_id, anonymous_id)
                 VALUES (?1, ?2, ?3, ?4)",
                (id, room_id, user_id, anonymous_id),
            )?;
            Ok(())
        })
    }

    /// Rejoin reactivates the existing row; the anonymous_id is untouched.
    pub fn set_member_active(&self, room_id: &str, user_id: &str, active: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE room_members SET active = ?3 WHERE room_id = ?1 AND user_id = ?2",
                rusqlite::params![room_id, user_id, active],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        room_id: &str,
        author_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, author_id, content, reply_to)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, room_id, author_id, content, reply_to],
            )?;
            Ok(())
        })
    }

    /// Full history for a room, oldest first — the reconciliation load order.
    pub fn get_messages(&self, room_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            // JOIN room_members to fetch the author's display handle in a
            // single query (eliminates N+1)
            let mut stmt = conn.prepare(
                "SELECT m.id, m.room_id, m.author_id, rm.anonymous_id, m.content, m.reply_to, m.created_at
                 FROM messages m
                 LEFT JOIN room_members rm ON rm.room_id = m.room_id AND rm.user_id = m.author_id
                 WHERE m.room_id = ?1
                 ORDER BY m.created_at ASC",
            )?;

            let rows = stmt
                .query_map([room_id], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        room_id: row.get(1)?,
                        author_id: row.get(2)?,
                        author_anonymous_id: row
                            .get::<_, Option<String>>(3)?
                            .unwrap_or_else(|| "Anon#????".to_string()),
                        content: row.get(4)?,
                        reply_to: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Reactions --

    /// At most one reaction per (message, user); a later write replaces the
    /// type rather than adding a row.
    pub fn upsert_reaction(
        &self,
        id: &str,
        message_id: &str,
        user_id: &str,
        reaction_type: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message_reactions (id, message_id, user_id, reaction_type)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id, user_id)
                 DO UPDATE SET reaction_type = excluded.reaction_type",
                (id, message_id, user_id, reaction_type),
            )?;
            Ok(())
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, message_id, user_id, reaction_type, created_at
                 FROM message_reactions WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        reaction_type: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Polls --

    pub fn insert_poll(
        &self,
        id: &str,
        room_id: &str,
        creator_id: &str,
        question: &str,
        poll_type: &str,
        options_json: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO polls (id, room_id, creator_id, question, poll_type, options)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, room_id, creator_id, question, poll_type, options_json),
            )?;
            Ok(())
        })
    }

    pub fn end_poll(&self, poll_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE polls SET active = 0 WHERE id = ?1", [poll_id])?;
            Ok(())
        })
    }

    pub fn get_poll(&self, poll_id: &str) -> Result<Option<PollRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, creator_id, question, poll_type, options, active, created_at
                 FROM polls WHERE id = ?1",
            )?;

            let row = stmt.query_row([poll_id], map_poll_row).optional()?;
            Ok(row)
        })
    }

    pub fn get_active_polls(&self, room_id: &str) -> Result<Vec<PollRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, creator_id, question, poll_type, options, active, created_at
                 FROM polls WHERE room_id = ?1 AND active = 1
                 ORDER BY created_at DESC",
            )?;

            let rows = stmt
                .query_map([room_id], map_poll_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Votes --

    /// At most one vote per (poll, user); re-voting overwrites the index.
    pub fn upsert_vote(
        &self,
        id: &str,
        poll_id: &str,
        user_id: &str,
        option_index: usize,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO poll_votes (id, poll_id, user_id, option_index)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(poll_id, user_id)
                 DO UPDATE SET option_index = excluded.option_index",
                rusqlite::params![id, poll_id, user_id, option_index],
            )?;
            Ok(())
        })
    }

    pub fn get_votes(&self, poll_id: &str) -> Result<Vec<VoteRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT poll_id, user_id, option_index FROM poll_votes WHERE poll_id = ?1")?;

            let rows = stmt
                .query_map([poll_id], |row| {
                    Ok(VoteRow {
                        poll_id: row.get(0)?,
                        user_id: row.get(1)?,
                        option_index: row.get::<_, i64>(2)? as usize,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_room(conn: &Connection, filter: &str, value: &str) -> Result<Option<RoomRow>> {
    let sql = format!(
        "SELECT id, code, name, owner_id, active, created_at FROM rooms WHERE {}",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(RoomRow {
                id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
                owner_id: row.get(3)?,
                active: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_poll_row(row: &rusqlite::Row<'_>) -> std::result::Result<PollRow, rusqlite::Error> {
    Ok(PollRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        creator_id: row.get(2)?,
        question: row.get(3)?,
        poll_type: row.get(4)?,
        options: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
