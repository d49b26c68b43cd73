/// Database row types — these map directly to SQLite rows.

#[derive(Debug)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub auth_token: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    /// Resolved at query time via a JOIN on users.
    pub sender_username: String,
    pub recipient_id: String,
    pub text: String,
    pub attached_file_id: Option<String>,
    pub created_at: String,
}

pub struct FileRow {
    pub id: String,
    pub file_name: String,
    pub created_at: String,
}
