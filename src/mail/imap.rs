//! IMAP mailbox subscriptions.
//!
//! A subscription opens a persistent session to INBOX and feeds matching new
//! messages into a bounded event channel. Server push (IDLE) is combined with
//! an UNSEEN scan shortly after the mailbox opens and a periodic fallback
//! scan, so a message is delivered whether it was already waiting, raced the
//! IDLE entry, or arrived while the server stayed silent. Transport errors
//! reconnect with linear backoff; budget or backoff exhaustion emits a single
//! `Timeout` event.

use anyhow::{anyhow, Context, Result};
use async_imap::Session;
use async_trait::async_trait;
use futures::StreamExt;
use mailparse::MailHeaderMap;
use std::fmt::Debug;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_native_tls::TlsStream;
use tokio_util::sync::CancellationToken;

use super::{
    Endpoint, IncomingEmail, MailboxSubscription, MailboxWatcher, WatchEvent,
};

const MAX_CONNECT_ATTEMPTS: u32 = 5;
const BACKOFF_STEP: Duration = Duration::from_secs(5);
/// Scan shortly after INBOX open to close the race between open and IDLE.
const POST_OPEN_SCAN_DELAY: Duration = Duration::from_secs(2);

type TlsImapSession = Session<TlsStream<TcpStream>>;
type PlainImapSession = Session<TcpStream>;

pub struct ImapWatcher;

impl ImapWatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImapWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailboxWatcher for ImapWatcher {
    async fn subscribe(
        &self,
        endpoint: &Endpoint,
        filter_from: Option<String>,
        wait_budget: Duration,
        poll_interval: Duration,
    ) -> Result<MailboxSubscription> {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            watch_mailbox(endpoint, filter_from, wait_budget, poll_interval, tx, task_cancel)
                .await;
        });
        Ok(MailboxSubscription::new(rx, cancel))
    }
}

/// Verify credentials by logging in and out. Used by the connectivity probe.
pub async fn probe_login(endpoint: &Endpoint) -> Result<()> {
    if endpoint.secure {
        let mut session = connect_tls(endpoint).await?;
        let _ = session.logout().await;
    } else {
        let mut session = connect_plain(endpoint).await?;
        let _ = session.logout().await;
    }
    Ok(())
}

async fn watch_mailbox(
    endpoint: Endpoint,
    filter_from: Option<String>,
    wait_budget: Duration,
    poll_interval: Duration,
    tx: mpsc::Sender<WatchEvent>,
    cancel: CancellationToken,
) {
    let deadline = Instant::now() + wait_budget;
    let mailbox = endpoint.username.clone();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return;
        }
        if Instant::now() >= deadline {
            emit_timeout(&tx, &mailbox).await;
            return;
        }

        let end = if endpoint.secure {
            match connect_tls(&endpoint).await {
                Ok(session) => {
                    run_watch(session, filter_from.as_deref(), deadline, poll_interval, &tx, &cancel)
                        .await
                }
                Err(e) => Err(e),
            }
        } else {
            match connect_plain(&endpoint).await {
                Ok(session) => {
                    run_watch(session, filter_from.as_deref(), deadline, poll_interval, &tx, &cancel)
                        .await
                }
                Err(e) => Err(e),
            }
        };

        match end {
            Ok(SessionEnd::Cancelled) => return,
            Ok(SessionEnd::Deadline) => {
                emit_timeout(&tx, &mailbox).await;
                return;
            }
            Err(e) => {
                attempt += 1;
                if attempt >= MAX_CONNECT_ATTEMPTS {
                    tracing::warn!(
                        mailbox = %mailbox,
                        attempt,
                        error = %format!("{e:#}"),
                        "imap watch gave up reconnecting"
                    );
                    emit_timeout(&tx, &mailbox).await;
                    return;
                }
                let backoff = BACKOFF_STEP * attempt;
                tracing::warn!(
                    mailbox = %mailbox,
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    error = %format!("{e:#}"),
                    "imap watch error, reconnecting"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

async fn emit_timeout(tx: &mpsc::Sender<WatchEvent>, mailbox: &str) {
    tracing::warn!(mailbox = %mailbox, "imap watch timed out without a matching message");
    let _ = tx.send(WatchEvent::Timeout).await;
}

enum SessionEnd {
    Cancelled,
    Deadline,
}

async fn run_watch<S>(
    mut session: Session<S>,
    filter_from: Option<&str>,
    deadline: Instant,
    poll_interval: Duration,
    tx: &mpsc::Sender<WatchEvent>,
    cancel: &CancellationToken,
) -> Result<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Unpin + Debug + Send + 'static,
{
    session.select("INBOX").await.context("select INBOX failed")?;

    let first_scan = POST_OPEN_SCAN_DELAY.min(deadline.saturating_duration_since(Instant::now()));
    tokio::select! {
        _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        _ = tokio::time::sleep(first_scan) => {}
    }
    scan_unseen(&mut session, filter_from, tx).await?;

    loop {
        if cancel.is_cancelled() {
            return Ok(SessionEnd::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(SessionEnd::Deadline);
        }
        let window = poll_interval.min(remaining);

        let mut idle = session.idle();
        idle.init().await.context("idle init failed")?;
        let (wait_fut, _interrupt) = idle.wait();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            res = tokio::time::timeout(window, wait_fut) => Some(res),
        };
        match outcome {
            // cancelled mid-IDLE; drop the connection
            None => return Ok(SessionEnd::Cancelled),
            Some(Ok(Err(e))) => return Err(anyhow!("idle wait failed: {e}")),
            // server notification or fallback-poll tick: scan either way
            Some(Ok(Ok(_))) | Some(Err(_)) => {}
        }
        session = idle.done().await.context("idle done failed")?;
        scan_unseen(&mut session, filter_from, tx).await?;
    }
}

/// Search UNSEEN (optionally AND FROM), fetch the full messages, mark them
/// seen and push each one that parses into the event channel.
async fn scan_unseen<S>(
    session: &mut Session<S>,
    filter_from: Option<&str>,
    tx: &mpsc::Sender<WatchEvent>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    let query = match filter_from {
        Some(addr) => format!("UNSEEN FROM \"{}\"", addr),
        None => "UNSEEN".to_string(),
    };
    let uids = session
        .uid_search(&query)
        .await
        .context("uid search failed")?;
    if uids.is_empty() {
        return Ok(());
    }
    let mut sorted: Vec<u32> = uids.into_iter().collect();
    sorted.sort_unstable();
    let seq = sorted
        .iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",");
    tracing::debug!(%seq, count = sorted.len(), "fetching unseen messages");

    let mut raws: Vec<Vec<u8>> = Vec::new();
    {
        let mut fetches = session
            .uid_fetch(&seq, "RFC822")
            .await
            .context("uid fetch failed")?;
        while let Some(item) = fetches.next().await {
            let fetch = item?;
            if let Some(body) = fetch.body() {
                raws.push(body.to_vec());
            }
        }
    }

    // mark seen so the fallback scan does not re-deliver forever
    {
        let mut store = session
            .uid_store(&seq, "+FLAGS (\\Seen)")
            .await
            .context("uid store failed")?;
        while let Some(item) = store.next().await {
            item?;
        }
    }

    for raw in raws {
        match parse_incoming(&raw) {
            Ok(message) => {
                if tx.send(WatchEvent::NewMessage(message)).await.is_err() {
                    // receiver gone, subscription disconnected
                    return Ok(());
                }
            }
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "dropping unparseable message");
            }
        }
    }
    Ok(())
}

/// Raw RFC822 bytes to the fields the orchestrator cares about.
fn parse_incoming(raw: &[u8]) -> Result<IncomingEmail> {
    let parsed = mailparse::parse_mail(raw).context("message parse failed")?;
    let headers = &parsed.headers;

    let from_addr = headers
        .get_first_value("From")
        .ok_or_else(|| anyhow!("message has no From header"))?;
    let to_addr = headers.get_first_value("To").unwrap_or_default();
    let subject = headers.get_first_value("Subject").unwrap_or_default();
    let message_id = headers
        .get_first_value("Message-ID")
        .map(|v| v.trim().to_string());
    let in_reply_to = headers
        .get_first_value("In-Reply-To")
        .map(|v| v.trim().to_string());
    let date = headers.get_first_value("Date");

    let body = text_body(&parsed)
        .or_else(|| parsed.get_body().ok())
        .unwrap_or_default();

    Ok(IncomingEmail {
        message_id,
        from_addr,
        to_addr,
        subject,
        body,
        in_reply_to,
        date,
    })
}

/// First text/plain part, walking multipart trees depth-first.
fn text_body(part: &mailparse::ParsedMail) -> Option<String> {
    if part.subparts.is_empty() {
        if part.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
            return part.get_body().ok();
        }
        return None;
    }
    part.subparts.iter().find_map(text_body)
}

async fn connect_tls(endpoint: &Endpoint) -> Result<TlsImapSession> {
    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .context("TCP connect failed")?;
    let tls = native_tls::TlsConnector::builder().build()?;
    let tls = tokio_native_tls::TlsConnector::from(tls);
    let tls_stream = tls
        .connect(&endpoint.host, tcp)
        .await
        .context("TLS handshake failed")?;
    let client = async_imap::Client::new(tls_stream);
    let session = client
        .login(&endpoint.username, &endpoint.password)
        .await
        .map_err(|e| anyhow!("imap login failed: {:?}", e.0))?;
    Ok(session)
}

async fn connect_plain(endpoint: &Endpoint) -> Result<PlainImapSession> {
    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .context("TCP connect failed")?;
    let client = async_imap::Client::new(tcp);
    let session = client
        .login(&endpoint.username, &endpoint.password)
        .await
        .map_err(|e| anyhow!("imap login failed: {:?}", e.0))?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_message() {
        let raw = b"From: Jane Lead <jane@leads.example>\r\n\
            To: warm@corp.example\r\n\
            Subject: Quick question\r\n\
            Message-ID: <abc123@leads.example>\r\n\
            Date: Sat, 1 Aug 2026 10:00:00 +0000\r\n\
            \r\n\
            Hi there!\r\n";
        let msg = parse_incoming(raw).unwrap();
        assert_eq!(msg.from_addr, "Jane Lead <jane@leads.example>");
        assert_eq!(msg.to_addr, "warm@corp.example");
        assert_eq!(msg.subject, "Quick question");
        assert_eq!(msg.message_id.as_deref(), Some("<abc123@leads.example>"));
        assert!(msg.in_reply_to.is_none());
        assert_eq!(msg.body.trim(), "Hi there!");
    }

    #[test]
    fn parses_reply_threading_headers() {
        let raw = b"From: warm@corp.example\r\n\
            To: jane@leads.example\r\n\
            Subject: Re: Quick question\r\n\
            Message-ID: <def456@corp.example>\r\n\
            In-Reply-To: <abc123@leads.example>\r\n\
            \r\n\
            Thanks!\r\n";
        let msg = parse_incoming(raw).unwrap();
        assert_eq!(msg.in_reply_to.as_deref(), Some("<abc123@leads.example>"));
    }

    #[test]
    fn prefers_the_plain_text_part() {
        let raw = b"From: a@b.example\r\n\
            To: c@d.example\r\n\
            Subject: multipart\r\n\
            MIME-Version: 1.0\r\n\
            Content-Type: multipart/alternative; boundary=XYZ\r\n\
            \r\n\
            --XYZ\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            plain body\r\n\
            --XYZ\r\n\
            Content-Type: text/html\r\n\
            \r\n\
            <p>html body</p>\r\n\
            --XYZ--\r\n";
        let msg = parse_incoming(raw).unwrap();
        assert_eq!(msg.body.trim(), "plain body");
    }

    #[test]
    fn message_without_from_is_an_error() {
        let raw = b"To: c@d.example\r\nSubject: nope\r\n\r\nbody\r\n";
        assert!(parse_incoming(raw).is_err());
    }
}
