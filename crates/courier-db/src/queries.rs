use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

use crate::Database;
use crate::models::{FileRow, MessageRow, UserRow};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password: &str,
        auth_token: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, auth_token) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password, auth_token),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "SELECT id, username, password, auth_token, created_at FROM users WHERE username = ?1", username)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "SELECT id, username, password, auth_token, created_at FROM users WHERE id = ?1", id)
        })
    }

    pub fn get_user_by_token(&self, token: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "SELECT id, username, password, auth_token, created_at FROM users WHERE auth_token = ?1", token)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        recipient_id: &str,
        text: &str,
        attached_file_id: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, text, attached_file_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, sender_id, recipient_id, text, attached_file_id],
            )?;
            Ok(())
        })
    }

    pub fn get_messages_for_recipient(&self, recipient_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            query_messages(
                conn,
                "WHERE m.recipient_id = ?1",
                rusqlite::params![recipient_id],
            )
        })
    }

    pub fn get_messages_for_sender(&self, sender_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            query_messages(conn, "WHERE m.sender_id = ?1", rusqlite::params![sender_id])
        })
    }

    /// Both directions of a two-user conversation, oldest first.
    pub fn get_messages_between(&self, user_a: &str, user_b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            query_messages(
                conn,
                "WHERE (m.sender_id = ?1 AND m.recipient_id = ?2)
                    OR (m.sender_id = ?2 AND m.recipient_id = ?1)",
                rusqlite::params![user_a, user_b],
            )
        })
    }

    // -- Files --

    pub fn insert_file(&self, id: &str, file_name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO files (id, file_name) VALUES (?1, ?2)",
                (id, file_name),
            )?;
            Ok(())
        })
    }

    pub fn get_file_by_id(&self, id: &str) -> Result<Option<FileRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, file_name, created_at FROM files WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(FileRow {
                            id: row.get(0)?,
                            file_name: row.get(1)?,
                            created_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }
}

fn query_user(conn: &Connection, sql: &str, param: &str) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(sql, [param], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                auth_token: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;
    Ok(row)
}

fn query_messages(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch sender_username in a single query (eliminates N+1)
    let sql = format!(
        "SELECT m.id, m.sender_id, u.username, m.recipient_id, m.text, m.attached_file_id, m.created_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         {where_clause}
         ORDER BY m.created_at ASC, m.rowid ASC",
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                sender_username: row
                    .get::<_, Option<String>>(2)?
                    .unwrap_or_else(|| "unknown".to_string()),
                recipient_id: row.get(3)?,
                text: row.get(4)?,
                attached_file_id: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
