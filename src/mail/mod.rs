//! Mail transport seam: sending over SMTP and watching a mailbox over IMAP.
//!
//! The orchestrator talks to these traits only; production wires
//! [`smtp::LettreSender`] and [`imap::ImapWatcher`], tests substitute
//! in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod imap;
pub mod smtp;

/// Connection parameters for one mailbox endpoint (SMTP or IMAP), with the
/// credential already decrypted.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from_name: String,
    pub from_addr: String,
    pub to_name: String,
    pub to_addr: String,
    pub subject: String,
    pub body: String,
    /// When set, both In-Reply-To and References carry this id.
    pub in_reply_to: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Generated RFC 5322 Message-ID, `<uuid@sender-domain>`.
    pub message_id: String,
    /// Recipients the server accepted the transaction for.
    pub accepted: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IncomingEmail {
    pub message_id: Option<String>,
    pub from_addr: String,
    pub to_addr: String,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
    pub date: Option<String>,
}

/// Events a mailbox subscription can deliver. `Timeout` fires at most once
/// per subscription, after the wait budget or on reconnect exhaustion.
#[derive(Debug)]
pub enum WatchEvent {
    NewMessage(IncomingEmail),
    Timeout,
}

/// A live mailbox subscription: a bounded channel of events plus a handle
/// that tears the listener down. Disconnect is idempotent; dropping the
/// subscription disconnects too.
pub struct MailboxSubscription {
    events: mpsc::Receiver<WatchEvent>,
    cancel: CancellationToken,
}

impl MailboxSubscription {
    pub fn new(events: mpsc::Receiver<WatchEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Next event, or `None` once the listener has gone away.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    pub fn disconnect(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MailboxSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
pub trait MailSender: Send + Sync {
    /// Send one message over a single-use connection.
    async fn send(&self, endpoint: &Endpoint, mail: &OutboundEmail) -> Result<SendReceipt>;
}

#[async_trait]
pub trait MailboxWatcher: Send + Sync {
    /// Watch the endpoint's INBOX for new messages, optionally restricted to
    /// a FROM address server-side. Matching UNSEEN messages present at
    /// subscribe time or arriving before disconnect are delivered at least
    /// once; after `wait_budget` without disconnect the subscription emits a
    /// single `Timeout` and stops.
    async fn subscribe(
        &self,
        endpoint: &Endpoint,
        filter_from: Option<String>,
        wait_budget: Duration,
        poll_interval: Duration,
    ) -> Result<MailboxSubscription>;
}

/// Fresh RFC 5322 Message-ID of shape `<uuid@sender-domain>`.
pub fn generate_message_id(from_addr: &str) -> String {
    let domain = from_addr.split('@').nth(1).unwrap_or("localhost");
    format!("<{}@{}>", Uuid::new_v4(), domain)
}

/// Bare address: display name and angle brackets stripped, lower-cased.
pub fn normalize_addr(raw: &str) -> String {
    let raw = raw.trim();
    let inner = match (raw.find('<'), raw.rfind('>')) {
        (Some(open), Some(close)) if open < close => &raw[open + 1..close],
        _ => raw,
    };
    inner.trim().to_ascii_lowercase()
}

pub fn addr_matches(a: &str, b: &str) -> bool {
    normalize_addr(a) == normalize_addr(b)
}
