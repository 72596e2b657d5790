//! Warm-up session: one calendar day of progress for one domain account.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Sending,
    WaitingReply,
    Paused,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::WaitingReply => "waiting_reply",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One row per (domain account, calendar day). Restarting the same day reuses
/// the row; `current_lead_index` never decreases within a session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WarmupSession {
    pub id: String,
    pub domain_account_id: String,
    /// Calendar day in the server's time zone, `YYYY-MM-DD`.
    pub session_date: String,
    /// 0-based index of the next lead to send to, or the lead in progress
    /// while waiting for a reply.
    pub current_lead_index: i64,
    pub status: SessionStatus,
    /// RFC 5322 id of the most recent outbound message.
    pub last_message_id: Option<String>,
    pub error_message: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}
