/// Database row types — these map directly to SQLite rows.
/// Distinct from the anonmeet-types wire models to keep the DB layer
/// independent; ids and timestamps stay as TEXT here and are parsed at the
/// read boundary.

pub struct RoomRow {
    pub id: String,
    pub code: String,
    pub name: String,
    pub owner_id: String,
    pub active: bool,
    pub created_at: String,
}

pub struct MemberRow {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub anonymous_id: String,
    pub active: bool,
    pub joined_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub author_id: String,
    pub author_anonymous_id: String,
    pub content: String,
    pub reply_to: Option<String>,
    pub created_at: String,
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub reaction_type: String,
    pub created_at: String,
}

pub struct PollRow {
    pub id: String,
    pub room_id: String,
    pub creator_id: String,
    pub question: String,
    pub poll_type: String,
    /// JSON array of option strings.
    pub options: String,
    pub active: bool,
    pub created_at: String,
}

pub struct VoteRow {
    pub poll_id: String,
    pub user_id: String,
    pub option_index: usize,
}
