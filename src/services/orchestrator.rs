//! The per-domain warm-up state machine.
//!
//! One orchestrator instance drives one domain account through the lead
//! roster as a single sequential task: compose and send the outbound, wait
//! for the lead's mailbox to see it, let a human-sized delay pass, send the
//! lead's reply, wait for the domain mailbox to see that, then advance.
//! Subscription timeouts skip the lead; SMTP or generator failures end the
//! session as failed. After every suspension point the task re-checks
//! pause/cancel before doing persistent work, because the control facade may
//! have taken the session away in the meantime.

use anyhow::{Context, Result};
use rand::Rng;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WarmupConfig;
use crate::crypto::CredentialCipher;
use crate::db;
use crate::db::sessions::StatusUpdate;
use crate::mail::{
    addr_matches, IncomingEmail, MailSender, MailboxSubscription, MailboxWatcher, OutboundEmail,
    WatchEvent,
};
use crate::models::account::{AccountStatus, DomainAccount, LeadAccount};
use crate::models::mail_log::{MailDirection, NewLogEntry};
use crate::models::session::SessionStatus;
use crate::services::textgen::ComposeText;
use crate::services::warmup::Registry;

/// Fixed pause after a skipped lead before the next cycle starts.
const SKIP_PAUSE: Duration = Duration::from_secs(10);

pub struct Orchestrator {
    pub(crate) pool: SqlitePool,
    pub(crate) timing: WarmupConfig,
    pub(crate) cipher: Arc<CredentialCipher>,
    pub(crate) sender: Arc<dyn MailSender>,
    pub(crate) watcher: Arc<dyn MailboxWatcher>,
    pub(crate) composer: Arc<dyn ComposeText>,
    pub(crate) domain: DomainAccount,
    pub(crate) leads: Vec<LeadAccount>,
    pub(crate) session_id: String,
    pub(crate) instance_id: Uuid,
    pub(crate) paused: Arc<AtomicBool>,
    pub(crate) cancel: CancellationToken,
    /// Mirror of the current lead index for the status endpoint.
    pub(crate) progress: Arc<AtomicUsize>,
    pub(crate) registry: Registry,
}

enum CycleOutcome {
    /// Lead round-trip confirmed; index advanced and persisted.
    Advanced,
    /// Wait budget ran out; index advanced and persisted, lead not retried.
    Skipped,
    /// Pause or stop observed; the facade owns the session row now.
    Interrupted,
}

enum Arrival {
    Message(IncomingEmail),
    Timeout,
    Interrupted,
}

impl Orchestrator {
    /// Entry point for the spawned task. Persists terminal states unless the
    /// facade already took the session (pause/stop), then deregisters.
    pub async fn run(self) {
        let domain_id = self.domain.id.clone();
        let email = self.domain.email.clone();
        tracing::info!(domain = %email, session = %self.session_id, "warm-up task started");

        let result = self.drive().await;

        if self.cancel.is_cancelled() {
            tracing::info!(domain = %email, "warm-up task interrupted");
        } else if let Err(e) = result {
            tracing::error!(domain = %email, error = %format!("{e:#}"), "warm-up session failed");
            let _ = db::sessions::update_status(
                &self.pool,
                &self.session_id,
                SessionStatus::Failed,
                StatusUpdate {
                    error: Some(e.to_string()),
                    ..Default::default()
                },
            )
            .await;
            let _ = db::accounts::set_domain_status(&self.pool, &domain_id, AccountStatus::Idle)
                .await;
        }

        // Deregister, but only if the registry still points at this instance;
        // the facade swaps entries on pause/stop.
        let mut registry = self.registry.write().await;
        let ours = registry
            .get(&domain_id)
            .map(|handle| handle.instance_id == self.instance_id)
            .unwrap_or(false);
        if ours {
            registry.remove(&domain_id);
        }
    }

    async fn drive(&self) -> Result<()> {
        let total = self.leads.len();
        let mut index = self.progress.load(Ordering::SeqCst);

        if self.interrupted() {
            return Ok(());
        }
        // pending -> sending on a fresh start; a no-op on the resume paths
        db::sessions::update_status(
            &self.pool,
            &self.session_id,
            SessionStatus::Sending,
            StatusUpdate::default(),
        )
        .await?;

        loop {
            if self.interrupted() {
                return Ok(());
            }
            if index >= total {
                return self.complete(total).await;
            }

            let lead = self.leads[index].clone();
            tracing::info!(
                domain = %self.domain.email,
                lead = %lead.email,
                index,
                total,
                "starting lead cycle"
            );

            match self.run_lead_cycle(index, &lead).await? {
                CycleOutcome::Interrupted => return Ok(()),
                CycleOutcome::Advanced => {
                    index += 1;
                    self.progress.store(index, Ordering::SeqCst);
                    if index >= total {
                        return self.complete(total).await;
                    }
                    let delay = draw_between(self.timing.min_delay, self.timing.max_delay);
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "inter-lead delay");
                    if !self.pause_aware_sleep(delay).await {
                        return Ok(());
                    }
                }
                CycleOutcome::Skipped => {
                    index += 1;
                    self.progress.store(index, Ordering::SeqCst);
                    if index >= total {
                        return self.complete(total).await;
                    }
                    if !self.pause_aware_sleep(SKIP_PAUSE).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One full send → receive → reply → receive round-trip for the lead at
    /// `index`.
    async fn run_lead_cycle(&self, index: usize, lead: &LeadAccount) -> Result<CycleOutcome> {
        let lead_index = index as i64;

        // 1. compose the outbound message
        let draft = self
            .composer
            .outbound(&self.domain.name, &lead.name, &self.domain.email)
            .await
            .context("text generator failed for outbound message")?;
        if self.interrupted() {
            return Ok(CycleOutcome::Interrupted);
        }

        // 2. send domain -> lead
        let domain_smtp = self.domain.smtp_endpoint(&self.cipher)?;
        let receipt = self
            .sender
            .send(
                &domain_smtp,
                &OutboundEmail {
                    from_name: self.domain.name.clone(),
                    from_addr: self.domain.email.clone(),
                    to_name: lead.name.clone(),
                    to_addr: lead.email.clone(),
                    subject: draft.subject.clone(),
                    body: draft.body.clone(),
                    in_reply_to: None,
                },
            )
            .await
            .context("smtp send to lead failed")?;

        // 3. the send was accepted, so it is logged even if we get paused here
        db::mail_log::append(
            &self.pool,
            &NewLogEntry {
                session_id: Some(self.session_id.clone()),
                from_addr: self.domain.email.clone(),
                to_addr: lead.email.clone(),
                subject: draft.subject.clone(),
                body: draft.body.clone(),
                message_id: Some(receipt.message_id.clone()),
                in_reply_to: None,
                direction: MailDirection::Sent,
                lead_index,
            },
        )
        .await?;
        if self.interrupted() {
            return Ok(CycleOutcome::Interrupted);
        }
        db::sessions::update_status(
            &self.pool,
            &self.session_id,
            SessionStatus::WaitingReply,
            StatusUpdate {
                last_message_id: Some(receipt.message_id.clone()),
                ..Default::default()
            },
        )
        .await?;

        // 4. watch the lead's mailbox for the message we just sent
        let lead_imap = lead.imap_endpoint(&self.cipher)?;
        let mut lead_watch = self
            .watcher
            .subscribe(
                &lead_imap,
                Some(self.domain.email.clone()),
                self.timing.imap_wait_timeout,
                self.timing.poll_interval,
            )
            .await?;

        // 5. wait for arrival on the lead side
        let incoming = match self.await_matching(&mut lead_watch, &self.domain.email).await {
            Arrival::Message(message) => message,
            Arrival::Timeout => {
                lead_watch.disconnect();
                return self.skip_lead(index).await;
            }
            Arrival::Interrupted => {
                lead_watch.disconnect();
                return Ok(CycleOutcome::Interrupted);
            }
        };
        db::mail_log::append(
            &self.pool,
            &NewLogEntry {
                session_id: Some(self.session_id.clone()),
                from_addr: incoming.from_addr.clone(),
                to_addr: lead.email.clone(),
                subject: incoming.subject.clone(),
                body: incoming.body.clone(),
                message_id: incoming.message_id.clone(),
                in_reply_to: incoming.in_reply_to.clone(),
                direction: MailDirection::Received,
                lead_index,
            },
        )
        .await?;
        lead_watch.disconnect();
        drop(lead_watch);

        // 5d. a human does not reply instantly
        let pause = draw_between(self.timing.reply_delay_min, self.timing.reply_delay_max);
        tracing::debug!(delay_ms = pause.as_millis() as u64, "reply delay");
        if !self.pause_aware_sleep(pause).await {
            return Ok(CycleOutcome::Interrupted);
        }

        // 6. compose the lead's reply
        let reply = self
            .composer
            .reply(
                &lead.name,
                &self.domain.name,
                &incoming.subject,
                &incoming.body,
            )
            .await
            .context("text generator failed for reply")?;
        if self.interrupted() {
            return Ok(CycleOutcome::Interrupted);
        }

        // 7. send lead -> domain, threaded onto the incoming message
        let lead_smtp = lead.smtp_endpoint(&self.cipher)?;
        let reply_receipt = self
            .sender
            .send(
                &lead_smtp,
                &OutboundEmail {
                    from_name: lead.name.clone(),
                    from_addr: lead.email.clone(),
                    to_name: self.domain.name.clone(),
                    to_addr: self.domain.email.clone(),
                    subject: reply.subject.clone(),
                    body: reply.body.clone(),
                    in_reply_to: incoming.message_id.clone(),
                },
            )
            .await
            .context("smtp reply from lead failed")?;

        // 8. log the reply
        db::mail_log::append(
            &self.pool,
            &NewLogEntry {
                session_id: Some(self.session_id.clone()),
                from_addr: lead.email.clone(),
                to_addr: self.domain.email.clone(),
                subject: reply.subject.clone(),
                body: reply.body.clone(),
                message_id: Some(reply_receipt.message_id.clone()),
                in_reply_to: incoming.message_id.clone(),
                direction: MailDirection::Replied,
                lead_index,
            },
        )
        .await?;
        if self.interrupted() {
            return Ok(CycleOutcome::Interrupted);
        }

        // 9. watch the domain mailbox for the reply
        let domain_imap = self.domain.imap_endpoint(&self.cipher)?;
        let mut domain_watch = self
            .watcher
            .subscribe(
                &domain_imap,
                Some(lead.email.clone()),
                self.timing.imap_wait_timeout,
                self.timing.poll_interval,
            )
            .await?;

        // 10. wait for arrival on the domain side
        let confirmation = match self.await_matching(&mut domain_watch, &lead.email).await {
            Arrival::Message(message) => message,
            Arrival::Timeout => {
                domain_watch.disconnect();
                return self.skip_lead(index).await;
            }
            Arrival::Interrupted => {
                domain_watch.disconnect();
                return Ok(CycleOutcome::Interrupted);
            }
        };
        db::mail_log::append(
            &self.pool,
            &NewLogEntry {
                session_id: Some(self.session_id.clone()),
                from_addr: confirmation.from_addr.clone(),
                to_addr: self.domain.email.clone(),
                subject: confirmation.subject.clone(),
                body: confirmation.body.clone(),
                message_id: confirmation.message_id.clone(),
                in_reply_to: confirmation.in_reply_to.clone(),
                direction: MailDirection::Received,
                lead_index,
            },
        )
        .await?;
        domain_watch.disconnect();
        drop(domain_watch);

        if self.interrupted() {
            return Ok(CycleOutcome::Interrupted);
        }

        // 10d. round-trip confirmed; advance
        db::sessions::update_status(
            &self.pool,
            &self.session_id,
            SessionStatus::Sending,
            StatusUpdate {
                index: Some(lead_index + 1),
                ..Default::default()
            },
        )
        .await?;
        tracing::info!(
            domain = %self.domain.email,
            lead = %lead.email,
            index,
            "lead round-trip confirmed"
        );
        Ok(CycleOutcome::Advanced)
    }

    /// Wait-budget ran out on one of the two subscriptions: advance past the
    /// lead without retrying it.
    async fn skip_lead(&self, index: usize) -> Result<CycleOutcome> {
        tracing::warn!(
            domain = %self.domain.email,
            lead_index = index,
            "no matching message within the wait budget, skipping lead"
        );
        if self.interrupted() {
            return Ok(CycleOutcome::Interrupted);
        }
        db::sessions::update_status(
            &self.pool,
            &self.session_id,
            SessionStatus::Sending,
            StatusUpdate {
                index: Some((index + 1) as i64),
                ..Default::default()
            },
        )
        .await?;
        Ok(CycleOutcome::Skipped)
    }

    /// Drain subscription events until one matches `expected_from`. Messages
    /// from anyone else are ignored; a closed channel counts as a timeout.
    async fn await_matching(
        &self,
        subscription: &mut MailboxSubscription,
        expected_from: &str,
    ) -> Arrival {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Arrival::Interrupted,
                event = subscription.next_event() => match event {
                    Some(WatchEvent::NewMessage(message)) => {
                        if addr_matches(&message.from_addr, expected_from) {
                            return Arrival::Message(message);
                        }
                        tracing::debug!(
                            from = %message.from_addr,
                            expected = %expected_from,
                            "ignoring message from unexpected sender"
                        );
                    }
                    Some(WatchEvent::Timeout) | None => return Arrival::Timeout,
                },
            }
        }
    }

    async fn complete(&self, total: usize) -> Result<()> {
        if self.interrupted() {
            return Ok(());
        }
        db::sessions::update_status(
            &self.pool,
            &self.session_id,
            SessionStatus::Completed,
            StatusUpdate {
                index: Some(total as i64),
                completed_at: Some(db::now_epoch()),
                ..Default::default()
            },
        )
        .await?;
        db::accounts::set_domain_status(&self.pool, &self.domain.id, AccountStatus::Idle).await?;
        tracing::info!(
            domain = %self.domain.email,
            leads = total,
            "warm-up session completed"
        );
        Ok(())
    }

    fn interrupted(&self) -> bool {
        self.cancel.is_cancelled() || self.paused.load(Ordering::SeqCst)
    }

    /// Sleep that wakes early on pause/stop. Returns false when interrupted.
    async fn pause_aware_sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => !self.interrupted(),
        }
    }
}

/// Uniform draw from the closed interval [min, max].
pub(crate) fn draw_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let ms = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_draw_stays_in_closed_interval() {
        let min = Duration::from_millis(180_000);
        let max = Duration::from_millis(300_000);
        for _ in 0..200 {
            let drawn = draw_between(min, max);
            assert!(drawn >= min && drawn <= max);
        }
    }

    #[test]
    fn degenerate_interval_returns_min() {
        let d = Duration::from_millis(500);
        assert_eq!(draw_between(d, d), d);
        assert_eq!(draw_between(d, Duration::from_millis(100)), d);
    }
}
