//! Session store: the durable record of per-mailbox warm-up progress and the
//! single source of truth across restarts.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::session::{SessionStatus, WarmupSession};

const COLUMNS: &str = "id, domain_account_id, session_date, current_lead_index, status, \
     last_message_id, error_message, started_at, completed_at";

/// Optional field updates applied alongside a status write. `None` leaves the
/// stored value untouched.
#[derive(Debug, Default, Clone)]
pub struct StatusUpdate {
    pub index: Option<i64>,
    pub last_message_id: Option<String>,
    pub error: Option<String>,
    pub completed_at: Option<i64>,
}

pub async fn find_by_id(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<WarmupSession>, sqlx::Error> {
    sqlx::query_as::<_, WarmupSession>(&format!(
        "SELECT {COLUMNS} FROM warmup_sessions WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Today's session in a non-terminal state, if any.
pub async fn find_active_today(
    pool: &SqlitePool,
    domain_account_id: &str,
    session_date: &str,
) -> Result<Option<WarmupSession>, sqlx::Error> {
    sqlx::query_as::<_, WarmupSession>(&format!(
        "SELECT {COLUMNS} FROM warmup_sessions \
         WHERE domain_account_id = ? AND session_date = ? \
           AND status NOT IN ('completed', 'failed')"
    ))
    .bind(domain_account_id)
    .bind(session_date)
    .fetch_optional(pool)
    .await
}

pub async fn find_completed_today(
    pool: &SqlitePool,
    domain_account_id: &str,
    session_date: &str,
) -> Result<Option<WarmupSession>, sqlx::Error> {
    sqlx::query_as::<_, WarmupSession>(&format!(
        "SELECT {COLUMNS} FROM warmup_sessions \
         WHERE domain_account_id = ? AND session_date = ? AND status = 'completed'"
    ))
    .bind(domain_account_id)
    .bind(session_date)
    .fetch_optional(pool)
    .await
}

/// Reuse or create today's row in one atomic statement: if a row exists for
/// (domain, day) it is reset to a fresh pending session, keeping its id.
pub async fn create_or_reset(
    pool: &SqlitePool,
    domain_account_id: &str,
    session_date: &str,
) -> Result<WarmupSession, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    sqlx::query_as::<_, WarmupSession>(&format!(
        "INSERT INTO warmup_sessions \
         (id, domain_account_id, session_date, current_lead_index, status, \
          last_message_id, error_message, started_at, completed_at) \
         VALUES (?, ?, ?, 0, 'pending', NULL, NULL, ?, NULL) \
         ON CONFLICT (domain_account_id, session_date) DO UPDATE SET \
           status = 'pending', current_lead_index = 0, last_message_id = NULL, \
           error_message = NULL, completed_at = NULL, started_at = excluded.started_at \
         RETURNING {COLUMNS}"
    ))
    .bind(&id)
    .bind(domain_account_id)
    .bind(session_date)
    .bind(super::now_epoch())
    .fetch_one(pool)
    .await
}

/// Atomic status write. Unset optional fields keep their stored values; a
/// write against a vanished row falls back to re-reading the store.
pub async fn update_status(
    pool: &SqlitePool,
    id: &str,
    status: SessionStatus,
    update: StatusUpdate,
) -> Result<WarmupSession, sqlx::Error> {
    let row = sqlx::query_as::<_, WarmupSession>(&format!(
        "UPDATE warmup_sessions SET \
           status = ?, \
           current_lead_index = COALESCE(?, current_lead_index), \
           last_message_id = COALESCE(?, last_message_id), \
           error_message = COALESCE(?, error_message), \
           completed_at = COALESCE(?, completed_at) \
         WHERE id = ? \
         RETURNING {COLUMNS}"
    ))
    .bind(status.as_str())
    .bind(update.index)
    .bind(update.last_message_id)
    .bind(update.error)
    .bind(update.completed_at)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(row),
        None => find_by_id(pool, id).await?.ok_or(sqlx::Error::RowNotFound),
    }
}

/// Resume a completed session after leads were appended: clear the completion
/// markers, keep the index, and go straight to `sending`.
pub async fn reopen_completed(
    pool: &SqlitePool,
    id: &str,
) -> Result<WarmupSession, sqlx::Error> {
    sqlx::query_as::<_, WarmupSession>(&format!(
        "UPDATE warmup_sessions SET \
           status = 'sending', completed_at = NULL, error_message = NULL \
         WHERE id = ? \
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .fetch_one(pool)
    .await
}

pub async fn list(
    pool: &SqlitePool,
    domain_account_id: Option<&str>,
) -> Result<Vec<WarmupSession>, sqlx::Error> {
    match domain_account_id {
        Some(domain) => {
            sqlx::query_as::<_, WarmupSession>(&format!(
                "SELECT {COLUMNS} FROM warmup_sessions \
                 WHERE domain_account_id = ? ORDER BY started_at DESC"
            ))
            .bind(domain)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, WarmupSession>(&format!(
                "SELECT {COLUMNS} FROM warmup_sessions ORDER BY started_at DESC"
            ))
            .fetch_all(pool)
            .await
        }
    }
}
