//! Mailbox account models: the domain account under warm-up and the lead
//! (responder) accounts it exchanges mail with.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::crypto::CredentialCipher;
use crate::mail::Endpoint;

/// Operational status of a domain account. A denormalised view of whether an
/// orchestrator currently holds the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AccountStatus {
    Idle,
    Running,
    Paused,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

/// The mailbox being warmed up.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DomainAccount {
    pub id: String,
    pub name: String,
    pub email: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_secure: bool,
    #[serde(skip_serializing)]
    pub smtp_password_encrypted: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_secure: bool,
    #[serde(skip_serializing)]
    pub imap_password_encrypted: String,
    pub status: AccountStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A cooperating responder mailbox. Same shape as `DomainAccount` minus the
/// operational status.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeadAccount {
    pub id: String,
    pub name: String,
    pub email: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_secure: bool,
    #[serde(skip_serializing)]
    pub smtp_password_encrypted: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_secure: bool,
    #[serde(skip_serializing)]
    pub imap_password_encrypted: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DomainAccount {
    pub fn smtp_endpoint(&self, cipher: &CredentialCipher) -> Result<Endpoint> {
        Ok(Endpoint {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            secure: self.smtp_secure,
            username: self.email.clone(),
            password: cipher.decrypt(&self.smtp_password_encrypted)?,
        })
    }

    pub fn imap_endpoint(&self, cipher: &CredentialCipher) -> Result<Endpoint> {
        Ok(Endpoint {
            host: self.imap_host.clone(),
            port: self.imap_port,
            secure: self.imap_secure,
            username: self.email.clone(),
            password: cipher.decrypt(&self.imap_password_encrypted)?,
        })
    }
}

impl LeadAccount {
    pub fn smtp_endpoint(&self, cipher: &CredentialCipher) -> Result<Endpoint> {
        Ok(Endpoint {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            secure: self.smtp_secure,
            username: self.email.clone(),
            password: cipher.decrypt(&self.smtp_password_encrypted)?,
        })
    }

    pub fn imap_endpoint(&self, cipher: &CredentialCipher) -> Result<Endpoint> {
        Ok(Endpoint {
            host: self.imap_host.clone(),
            port: self.imap_port,
            secure: self.imap_secure,
            username: self.email.clone(),
            password: cipher.decrypt(&self.imap_password_encrypted)?,
        })
    }
}
