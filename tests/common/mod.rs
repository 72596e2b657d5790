//! Shared test fixtures: an in-memory mail network standing in for SMTP/IMAP
//! and a canned text composer, wired into a real manager over a real
//! (in-memory) store.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use mailwarm::config::WarmupConfig;
use mailwarm::crypto::CredentialCipher;
use mailwarm::db;
use mailwarm::mail::{
    addr_matches, generate_message_id, normalize_addr, Endpoint, IncomingEmail, MailSender,
    MailboxSubscription, MailboxWatcher, OutboundEmail, SendReceipt, WatchEvent,
};
use mailwarm::models::account::{AccountStatus, DomainAccount, LeadAccount};
use mailwarm::services::textgen::{ComposeText, MailText};
use mailwarm::services::warmup::WarmupManager;

#[derive(Debug, Clone)]
pub struct SentRecord {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub message_id: String,
    pub in_reply_to: Option<String>,
}

struct NetworkState {
    /// Undelivered messages per normalized recipient address.
    backlog: HashMap<String, Vec<IncomingEmail>>,
    /// Live feeds for open subscriptions, per mailbox address.
    feeds: HashMap<String, broadcast::Sender<IncomingEmail>>,
    /// Addresses whose incoming mail silently vanishes.
    blackholes: HashSet<String>,
    sent: Vec<SentRecord>,
}

/// In-memory mail fabric: `send` delivers straight into the recipient's
/// mailbox unless the address is blackholed; subscriptions drain the backlog
/// at attach time (removing what they deliver, like a seen-flag) and then
/// follow the live feed.
pub struct FakeMailNetwork {
    state: Mutex<NetworkState>,
}

impl FakeMailNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(NetworkState {
                backlog: HashMap::new(),
                feeds: HashMap::new(),
                blackholes: HashSet::new(),
                sent: Vec::new(),
            }),
        })
    }

    pub fn blackhole(&self, addr: &str) {
        self.state
            .lock()
            .unwrap()
            .blackholes
            .insert(normalize_addr(addr));
    }

    pub fn unblackhole(&self, addr: &str) {
        self.state
            .lock()
            .unwrap()
            .blackholes
            .remove(&normalize_addr(addr));
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().unwrap().sent.len()
    }

    fn record_send(&self, mail: &OutboundEmail, message_id: &str) {
        self.state.lock().unwrap().sent.push(SentRecord {
            from: mail.from_addr.clone(),
            to: mail.to_addr.clone(),
            subject: mail.subject.clone(),
            message_id: message_id.to_string(),
            in_reply_to: mail.in_reply_to.clone(),
        });
    }

    fn deliver(&self, to: &str, message: IncomingEmail) {
        let mut state = self.state.lock().unwrap();
        let mailbox = normalize_addr(to);
        if state.blackholes.contains(&mailbox) {
            return;
        }
        let delivered_live = state
            .feeds
            .get(&mailbox)
            .map(|feed| feed.receiver_count() > 0 && feed.send(message.clone()).is_ok())
            .unwrap_or(false);
        if !delivered_live {
            state.backlog.entry(mailbox).or_default().push(message);
        }
    }

    /// Drain the matching backlog for a mailbox and hand out a live feed.
    fn attach(
        &self,
        mailbox: &str,
        filter_from: Option<&str>,
    ) -> (Vec<IncomingEmail>, broadcast::Receiver<IncomingEmail>) {
        let mut state = self.state.lock().unwrap();
        let pending = match state.backlog.get_mut(mailbox) {
            Some(queue) => {
                let (matching, rest): (Vec<_>, Vec<_>) = queue.drain(..).partition(|m| {
                    filter_from
                        .map(|f| addr_matches(&m.from_addr, f))
                        .unwrap_or(true)
                });
                *queue = rest;
                matching
            }
            None => Vec::new(),
        };
        let feed = state
            .feeds
            .entry(mailbox.to_string())
            .or_insert_with(|| broadcast::channel(32).0);
        (pending, feed.subscribe())
    }
}

#[derive(Clone)]
pub struct FakeTransport {
    pub net: Arc<FakeMailNetwork>,
}

#[async_trait]
impl MailSender for FakeTransport {
    async fn send(&self, _endpoint: &Endpoint, mail: &OutboundEmail) -> Result<SendReceipt> {
        let message_id = generate_message_id(&mail.from_addr);
        self.net.record_send(mail, &message_id);
        self.net.deliver(
            &mail.to_addr,
            IncomingEmail {
                message_id: Some(message_id.clone()),
                from_addr: mail.from_addr.clone(),
                to_addr: mail.to_addr.clone(),
                subject: mail.subject.clone(),
                body: mail.body.clone(),
                in_reply_to: mail.in_reply_to.clone(),
                date: None,
            },
        );
        Ok(SendReceipt {
            message_id,
            accepted: vec![mail.to_addr.clone()],
        })
    }
}

#[async_trait]
impl MailboxWatcher for FakeTransport {
    async fn subscribe(
        &self,
        endpoint: &Endpoint,
        filter_from: Option<String>,
        wait_budget: Duration,
        _poll_interval: Duration,
    ) -> Result<MailboxSubscription> {
        let mailbox = normalize_addr(&endpoint.username);
        let (tx, rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let (pending, mut feed) = self.net.attach(&mailbox, filter_from.as_deref());

        tokio::spawn(async move {
            for message in pending {
                if tx.send(WatchEvent::NewMessage(message)).await.is_err() {
                    return;
                }
            }
            let timeout = tokio::time::sleep(wait_budget);
            tokio::pin!(timeout);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    _ = &mut timeout => {
                        let _ = tx.send(WatchEvent::Timeout).await;
                        return;
                    }
                    received = feed.recv() => match received {
                        Ok(message) => {
                            let matches = filter_from
                                .as_deref()
                                .map(|f| addr_matches(&message.from_addr, f))
                                .unwrap_or(true);
                            if matches
                                && tx.send(WatchEvent::NewMessage(message)).await.is_err()
                            {
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    },
                }
            }
        });

        Ok(MailboxSubscription::new(rx, cancel))
    }
}

pub struct FakeComposer;

#[async_trait]
impl ComposeText for FakeComposer {
    async fn outbound(
        &self,
        sender_name: &str,
        recipient_name: &str,
        _sender_addr: &str,
    ) -> Result<MailText> {
        Ok(MailText {
            subject: format!("Hello from {sender_name}"),
            body: format!("Hi {recipient_name}, just checking in."),
        })
    }

    async fn reply(
        &self,
        _replier_name: &str,
        _original_sender_name: &str,
        original_subject: &str,
        _original_body: &str,
    ) -> Result<MailText> {
        Ok(MailText {
            subject: format!("Re: {original_subject}"),
            body: "Thanks, good to hear from you!".to_string(),
        })
    }
}

pub struct TestEnv {
    pub pool: SqlitePool,
    pub manager: Arc<WarmupManager>,
    pub net: Arc<FakeMailNetwork>,
    pub cipher: Arc<CredentialCipher>,
}

pub async fn test_env(timing: WarmupConfig) -> TestEnv {
    let pool = db::connect("sqlite::memory:").await.expect("memory pool");
    db::run_migrations(&pool).await.expect("migrate");
    let cipher = Arc::new(
        CredentialCipher::from_base64_key(&BASE64.encode([9u8; 32])).expect("test cipher"),
    );
    let net = FakeMailNetwork::new();
    let transport = Arc::new(FakeTransport { net: net.clone() });
    let manager = Arc::new(WarmupManager::new(
        pool.clone(),
        timing,
        cipher.clone(),
        transport.clone(),
        transport,
        Arc::new(FakeComposer),
    ));
    TestEnv {
        pool,
        manager,
        net,
        cipher,
    }
}

/// Zero pacing, short wait budget: the configuration the end-to-end
/// scenarios run under.
pub fn instant_timing() -> WarmupConfig {
    timing_with_wait(Duration::from_secs(1))
}

pub fn timing_with_wait(wait_budget: Duration) -> WarmupConfig {
    WarmupConfig {
        min_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        imap_wait_timeout: wait_budget,
        poll_interval: Duration::from_millis(100),
        reply_delay_min: Duration::ZERO,
        reply_delay_max: Duration::ZERO,
    }
}

pub async fn insert_domain_account(env: &TestEnv, name: &str, email: &str) -> DomainAccount {
    let now = db::now_epoch();
    let account = DomainAccount {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        email: email.to_string(),
        smtp_host: "smtp.warm.test".into(),
        smtp_port: 587,
        smtp_secure: false,
        smtp_password_encrypted: env.cipher.encrypt("domain-pw").unwrap(),
        imap_host: "imap.warm.test".into(),
        imap_port: 993,
        imap_secure: true,
        imap_password_encrypted: env.cipher.encrypt("domain-pw").unwrap(),
        status: AccountStatus::Idle,
        created_at: now,
        updated_at: now,
    };
    db::accounts::insert_domain(&env.pool, &account).await.unwrap();
    account
}

pub async fn insert_lead_account(env: &TestEnv, name: &str, email: &str) -> LeadAccount {
    let now = db::now_epoch();
    let account = LeadAccount {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        email: email.to_string(),
        smtp_host: "smtp.leads.test".into(),
        smtp_port: 587,
        smtp_secure: false,
        smtp_password_encrypted: env.cipher.encrypt("lead-pw").unwrap(),
        imap_host: "imap.leads.test".into(),
        imap_port: 993,
        imap_secure: true,
        imap_password_encrypted: env.cipher.encrypt("lead-pw").unwrap(),
        created_at: now,
        updated_at: now,
    };
    db::accounts::insert_lead(&env.pool, &account).await.unwrap();
    account
}

/// Poll `check` until it passes or the deadline expires.
pub async fn eventually<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
