//! Append-only audit of every message the warm-up machinery sends or observes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MailDirection {
    /// Outbound from the domain account.
    Sent,
    /// Observed on a mailbox of interest.
    Received,
    /// Outbound from a lead back to the domain.
    Replied,
}

impl MailDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
            Self::Replied => "replied",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MailLogEntry {
    pub id: i64,
    pub session_id: Option<String>,
    pub from_addr: String,
    pub to_addr: String,
    pub subject: String,
    pub body: String,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub direction: MailDirection,
    pub lead_index: i64,
    pub created_at: i64,
}

/// Fields for a new log row; id and timestamp are assigned on append.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub session_id: Option<String>,
    pub from_addr: String,
    pub to_addr: String,
    pub subject: String,
    pub body: String,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub direction: MailDirection,
    pub lead_index: i64,
}
