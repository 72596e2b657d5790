//! Append-only mail audit log. Entries are created by the orchestrator and
//! never modified.

use sqlx::SqlitePool;

use crate::models::mail_log::{MailLogEntry, NewLogEntry};

const COLUMNS: &str = "id, session_id, from_addr, to_addr, subject, body, message_id, \
     in_reply_to, direction, lead_index, created_at";

pub async fn append(pool: &SqlitePool, entry: &NewLogEntry) -> Result<MailLogEntry, sqlx::Error> {
    sqlx::query_as::<_, MailLogEntry>(&format!(
        "INSERT INTO mail_log (session_id, from_addr, to_addr, subject, body, message_id, \
         in_reply_to, direction, lead_index, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         RETURNING {COLUMNS}"
    ))
    .bind(&entry.session_id)
    .bind(&entry.from_addr)
    .bind(&entry.to_addr)
    .bind(&entry.subject)
    .bind(&entry.body)
    .bind(&entry.message_id)
    .bind(&entry.in_reply_to)
    .bind(entry.direction.as_str())
    .bind(entry.lead_index)
    .bind(super::now_epoch())
    .fetch_one(pool)
    .await
}

/// Entries for one session in chronological order.
pub async fn list_by_session(
    pool: &SqlitePool,
    session_id: &str,
) -> Result<Vec<MailLogEntry>, sqlx::Error> {
    sqlx::query_as::<_, MailLogEntry>(&format!(
        "SELECT {COLUMNS} FROM mail_log WHERE session_id = ? ORDER BY id ASC"
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await
}

pub async fn find_by_message_id(
    pool: &SqlitePool,
    message_id: &str,
) -> Result<Option<MailLogEntry>, sqlx::Error> {
    sqlx::query_as::<_, MailLogEntry>(&format!(
        "SELECT {COLUMNS} FROM mail_log WHERE message_id = ? ORDER BY id ASC LIMIT 1"
    ))
    .bind(message_id)
    .fetch_optional(pool)
    .await
}

pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<MailLogEntry>, sqlx::Error> {
    sqlx::query_as::<_, MailLogEntry>(&format!(
        "SELECT {COLUMNS} FROM mail_log ORDER BY id DESC LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
}
