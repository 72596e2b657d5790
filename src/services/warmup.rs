//! Control facade for warm-up sessions.
//!
//! The only entry point to the orchestrator: start / pause / resume / stop /
//! status, keyed by domain-account id. Owns the registry of live orchestrator
//! instances; there is never more than one per domain account. Session rows
//! are written by the owning orchestrator plus this facade's pause/stop
//! paths, and both go through the registry lock.

use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WarmupConfig;
use crate::crypto::CredentialCipher;
use crate::db;
use crate::db::sessions::StatusUpdate;
use crate::mail::{MailSender, MailboxWatcher};
use crate::models::account::AccountStatus;
use crate::models::session::{SessionStatus, WarmupSession};
use crate::services::orchestrator::Orchestrator;
use crate::services::textgen::ComposeText;

pub const MANUAL_STOP_MESSAGE: &str = "Manually stopped by user";

#[derive(Debug, Error)]
pub enum WarmupError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("storage unavailable: {0}")]
    Store(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// In-memory handle to a live orchestrator task.
pub struct OrchestratorHandle {
    pub instance_id: Uuid,
    pub session_id: String,
    pub total_leads: usize,
    pub current_index: Arc<AtomicUsize>,
    pub paused: Arc<AtomicBool>,
    pub cancel: CancellationToken,
}

pub type Registry = Arc<RwLock<HashMap<String, OrchestratorHandle>>>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveStatus {
    pub current_lead_index: usize,
    pub total_leads: usize,
    pub is_paused: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<ActiveStatus>,
    pub session: Option<WarmupSession>,
    pub completed_today: bool,
}

pub struct WarmupManager {
    pool: SqlitePool,
    timing: WarmupConfig,
    cipher: Arc<CredentialCipher>,
    sender: Arc<dyn MailSender>,
    watcher: Arc<dyn MailboxWatcher>,
    composer: Arc<dyn ComposeText>,
    registry: Registry,
}

impl WarmupManager {
    pub fn new(
        pool: SqlitePool,
        timing: WarmupConfig,
        cipher: Arc<CredentialCipher>,
        sender: Arc<dyn MailSender>,
        watcher: Arc<dyn MailboxWatcher>,
        composer: Arc<dyn ComposeText>,
    ) -> Self {
        Self {
            pool,
            timing,
            cipher,
            sender,
            watcher,
            composer,
            registry: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start (or resume) today's warm-up for a domain account. The registry
    /// write lock is held across session resolution so racing starts
    /// serialise and exactly one wins.
    pub async fn start(&self, domain_account_id: &str) -> Result<WarmupSession, WarmupError> {
        let mut registry = self.registry.write().await;
        if registry.contains_key(domain_account_id) {
            return Err(WarmupError::Validation(
                "warm-up is already running for this account".into(),
            ));
        }

        let domain = db::accounts::find_domain(&self.pool, domain_account_id)
            .await?
            .ok_or_else(|| {
                WarmupError::NotFound(format!("domain account {domain_account_id} not found"))
            })?;
        let leads = db::accounts::list_leads(&self.pool).await?;
        if leads.is_empty() {
            return Err(WarmupError::Validation(
                "no lead accounts configured, add leads before starting".into(),
            ));
        }

        let today = db::today();
        let session = if let Some(completed) =
            db::sessions::find_completed_today(&self.pool, domain_account_id, &today).await?
        {
            if (completed.current_lead_index as usize) < leads.len() {
                // leads were appended after completion: resume from the
                // stored index with the completion markers cleared
                tracing::info!(
                    domain = %domain.email,
                    index = completed.current_lead_index,
                    leads = leads.len(),
                    "resuming completed session with appended leads"
                );
                db::sessions::reopen_completed(&self.pool, &completed.id).await?
            } else {
                return Err(WarmupError::Validation(
                    "warm-up already completed for today".into(),
                ));
            }
        } else if let Some(active) =
            db::sessions::find_active_today(&self.pool, domain_account_id, &today).await?
        {
            match active.status {
                SessionStatus::Paused => {
                    db::sessions::update_status(
                        &self.pool,
                        &active.id,
                        SessionStatus::Sending,
                        StatusUpdate::default(),
                    )
                    .await?
                }
                other => {
                    return Err(WarmupError::Validation(format!(
                        "warm-up session already exists with status {}",
                        other.as_str()
                    )));
                }
            }
        } else {
            db::sessions::create_or_reset(&self.pool, domain_account_id, &today).await?
        };

        db::accounts::set_domain_status(&self.pool, domain_account_id, AccountStatus::Running)
            .await?;

        let instance_id = Uuid::new_v4();
        let paused = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let progress = Arc::new(AtomicUsize::new(session.current_lead_index.max(0) as usize));

        registry.insert(
            domain_account_id.to_string(),
            OrchestratorHandle {
                instance_id,
                session_id: session.id.clone(),
                total_leads: leads.len(),
                current_index: progress.clone(),
                paused: paused.clone(),
                cancel: cancel.clone(),
            },
        );
        drop(registry);

        let orchestrator = Orchestrator {
            pool: self.pool.clone(),
            timing: self.timing.clone(),
            cipher: self.cipher.clone(),
            sender: self.sender.clone(),
            watcher: self.watcher.clone(),
            composer: self.composer.clone(),
            domain,
            leads,
            session_id: session.id.clone(),
            instance_id,
            paused,
            cancel,
            progress,
            registry: self.registry.clone(),
        };
        tokio::spawn(orchestrator.run());

        Ok(session)
    }

    /// Alias for `start`; the paused branch of the resolution ladder applies.
    pub async fn resume(&self, domain_account_id: &str) -> Result<WarmupSession, WarmupError> {
        self.start(domain_account_id).await
    }

    /// Pause a running warm-up. The orchestrator's in-flight SMTP send (if
    /// any) completes and is logged; every later step observes the pause and
    /// returns without touching the session row.
    pub async fn pause(&self, domain_account_id: &str) -> Result<WarmupSession, WarmupError> {
        let mut registry = self.registry.write().await;
        let Some(handle) = registry.remove(domain_account_id) else {
            drop(registry);
            // pausing an already-paused session is a no-op returning the row
            let today = db::today();
            if let Some(active) =
                db::sessions::find_active_today(&self.pool, domain_account_id, &today).await?
            {
                if active.status == SessionStatus::Paused {
                    return Ok(active);
                }
            }
            return Err(WarmupError::Validation(
                "no active warm-up session to pause".into(),
            ));
        };
        drop(registry);

        handle.paused.store(true, Ordering::SeqCst);
        handle.cancel.cancel();

        // the task may have reached a terminal state in the meantime; never
        // move a session backward out of it
        let current = db::sessions::find_by_id(&self.pool, &handle.session_id)
            .await?
            .ok_or_else(|| WarmupError::NotFound("session row disappeared".into()))?;
        if current.status.is_terminal() {
            return Err(WarmupError::Validation(format!(
                "warm-up session already {}",
                current.status.as_str()
            )));
        }
        let session = db::sessions::update_status(
            &self.pool,
            &handle.session_id,
            SessionStatus::Paused,
            StatusUpdate::default(),
        )
        .await?;
        db::accounts::set_domain_status(&self.pool, domain_account_id, AccountStatus::Paused)
            .await?;
        tracing::info!(domain_account_id, "warm-up paused");
        Ok(session)
    }

    /// Stop a warm-up: a live orchestrator is torn down and its session
    /// marked failed; with no live orchestrator, a non-terminal row for today
    /// is failed in place. No-op when there is nothing to stop.
    pub async fn stop(
        &self,
        domain_account_id: &str,
    ) -> Result<Option<WarmupSession>, WarmupError> {
        let mut registry = self.registry.write().await;
        if let Some(handle) = registry.remove(domain_account_id) {
            drop(registry);
            handle.paused.store(true, Ordering::SeqCst);
            handle.cancel.cancel();
            let current = db::sessions::find_by_id(&self.pool, &handle.session_id)
                .await?
                .ok_or_else(|| WarmupError::NotFound("session row disappeared".into()))?;
            if current.status.is_terminal() {
                return Ok(Some(current));
            }
            let session = db::sessions::update_status(
                &self.pool,
                &handle.session_id,
                SessionStatus::Failed,
                StatusUpdate {
                    error: Some(MANUAL_STOP_MESSAGE.into()),
                    ..Default::default()
                },
            )
            .await?;
            db::accounts::set_domain_status(&self.pool, domain_account_id, AccountStatus::Idle)
                .await?;
            tracing::info!(domain_account_id, "warm-up stopped");
            return Ok(Some(session));
        }
        drop(registry);

        // no live orchestrator: clean up a stale row if one exists
        let today = db::today();
        if let Some(active) =
            db::sessions::find_active_today(&self.pool, domain_account_id, &today).await?
        {
            let session = db::sessions::update_status(
                &self.pool,
                &active.id,
                SessionStatus::Failed,
                StatusUpdate {
                    error: Some(MANUAL_STOP_MESSAGE.into()),
                    ..Default::default()
                },
            )
            .await?;
            db::accounts::set_domain_status(&self.pool, domain_account_id, AccountStatus::Idle)
                .await?;
            tracing::info!(domain_account_id, "stale warm-up session stopped");
            return Ok(Some(session));
        }
        Ok(None)
    }

    pub async fn status(&self, domain_account_id: &str) -> Result<StatusReport, WarmupError> {
        db::accounts::find_domain(&self.pool, domain_account_id)
            .await?
            .ok_or_else(|| {
                WarmupError::NotFound(format!("domain account {domain_account_id} not found"))
            })?;

        let active = {
            let registry = self.registry.read().await;
            registry.get(domain_account_id).map(|handle| ActiveStatus {
                current_lead_index: handle.current_index.load(Ordering::SeqCst),
                total_leads: handle.total_leads,
                is_paused: handle.paused.load(Ordering::SeqCst),
            })
        };

        let leads = db::accounts::list_leads(&self.pool).await?;
        let today = db::today();
        let active_today =
            db::sessions::find_active_today(&self.pool, domain_account_id, &today).await?;
        let completed =
            db::sessions::find_completed_today(&self.pool, domain_account_id, &today).await?;

        // a completed session with fewer leads than the roster signals
        // "restart available" rather than "done for today"
        let completed_today = completed
            .as_ref()
            .map(|session| (session.current_lead_index as usize) >= leads.len())
            .unwrap_or(false);
        let session = active_today.or(completed);

        Ok(StatusReport {
            active,
            session,
            completed_today,
        })
    }

    pub async fn is_running(&self, domain_account_id: &str) -> bool {
        self.registry.read().await.contains_key(domain_account_id)
    }

    /// Graceful shutdown: pause every live orchestrator so sessions are
    /// re-startable, then let the caller close the store.
    pub async fn shutdown_all(&self) {
        let handles: Vec<(String, OrchestratorHandle)> = {
            let mut registry = self.registry.write().await;
            registry.drain().collect()
        };
        for (domain_account_id, handle) in handles {
            handle.paused.store(true, Ordering::SeqCst);
            handle.cancel.cancel();
            let still_open = matches!(
                db::sessions::find_by_id(&self.pool, &handle.session_id).await,
                Ok(Some(session)) if !session.status.is_terminal()
            );
            if still_open {
                let _ = db::sessions::update_status(
                    &self.pool,
                    &handle.session_id,
                    SessionStatus::Paused,
                    StatusUpdate::default(),
                )
                .await;
                let _ = db::accounts::set_domain_status(
                    &self.pool,
                    &domain_account_id,
                    AccountStatus::Paused,
                )
                .await;
            }
            tracing::info!(domain_account_id = %domain_account_id, "warm-up paused for shutdown");
        }
    }
}
