//! Domain and lead account management endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::CredentialCipher;
use crate::db;
use crate::mail::{self, Endpoint};
use crate::models::account::{AccountStatus, DomainAccount, LeadAccount};
use crate::services::warmup::{WarmupError, WarmupManager};

use super::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct CreateAccountReq {
    pub name: String,
    pub email: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    #[serde(default = "default_secure")]
    pub smtp_secure: bool,
    pub smtp_password: String,
    pub imap_host: String,
    pub imap_port: u16,
    #[serde(default = "default_secure")]
    pub imap_secure: bool,
    pub imap_password: String,
}

fn default_secure() -> bool {
    true
}

impl CreateAccountReq {
    fn validate(&self) -> Result<(), WarmupError> {
        if self.name.trim().is_empty() {
            return Err(WarmupError::Validation("name is required".into()));
        }
        if !self.email.contains('@') {
            return Err(WarmupError::Validation("email is not a valid address".into()));
        }
        if self.smtp_host.trim().is_empty() || self.imap_host.trim().is_empty() {
            return Err(WarmupError::Validation("smtp_host and imap_host are required".into()));
        }
        if self.smtp_password.is_empty() || self.imap_password.is_empty() {
            return Err(WarmupError::Validation(
                "smtp_password and imap_password are required".into(),
            ));
        }
        Ok(())
    }
}

/// POST /accounts/domain
pub async fn create_domain(
    State(pool): State<SqlitePool>,
    State(cipher): State<Arc<CredentialCipher>>,
    Json(req): Json<CreateAccountReq>,
) -> Result<Json<ApiResponse<DomainAccount>>, WarmupError> {
    req.validate()?;
    let now = db::now_epoch();
    let account = DomainAccount {
        id: Uuid::new_v4().to_string(),
        name: req.name.trim().to_string(),
        email: req.email.trim().to_lowercase(),
        smtp_host: req.smtp_host.trim().to_string(),
        smtp_port: req.smtp_port,
        smtp_secure: req.smtp_secure,
        smtp_password_encrypted: cipher.encrypt(&req.smtp_password)?,
        imap_host: req.imap_host.trim().to_string(),
        imap_port: req.imap_port,
        imap_secure: req.imap_secure,
        imap_password_encrypted: cipher.encrypt(&req.imap_password)?,
        status: AccountStatus::Idle,
        created_at: now,
        updated_at: now,
    };
    db::accounts::insert_domain(&pool, &account)
        .await
        .map_err(conflict_on_duplicate_email)?;
    tracing::info!(email = %account.email, "domain account created");
    Ok(Json(ApiResponse::ok(account)))
}

/// GET /accounts/domain
pub async fn list_domains(
    State(pool): State<SqlitePool>,
) -> Result<Json<ApiResponse<Vec<DomainAccount>>>, WarmupError> {
    let accounts = db::accounts::list_domains(&pool).await?;
    Ok(Json(ApiResponse::ok(accounts)))
}

/// GET /accounts/domain/:id
pub async fn get_domain(
    State(pool): State<SqlitePool>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<DomainAccount>>, WarmupError> {
    let account = db::accounts::find_domain(&pool, &id)
        .await?
        .ok_or_else(|| WarmupError::NotFound(format!("domain account {id} not found")))?;
    Ok(Json(ApiResponse::ok(account)))
}

/// DELETE /accounts/domain/:id
pub async fn delete_domain(
    State(pool): State<SqlitePool>,
    State(manager): State<Arc<WarmupManager>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, WarmupError> {
    if manager.is_running(&id).await {
        return Err(WarmupError::Validation(
            "stop the running warm-up before deleting this account".into(),
        ));
    }
    if !db::accounts::delete_domain(&pool, &id).await? {
        return Err(WarmupError::NotFound(format!("domain account {id} not found")));
    }
    Ok(Json(ApiResponse::message("domain account deleted")))
}

/// POST /accounts/lead
pub async fn create_lead(
    State(pool): State<SqlitePool>,
    State(cipher): State<Arc<CredentialCipher>>,
    Json(req): Json<CreateAccountReq>,
) -> Result<Json<ApiResponse<LeadAccount>>, WarmupError> {
    req.validate()?;
    let now = db::now_epoch();
    let account = LeadAccount {
        id: Uuid::new_v4().to_string(),
        name: req.name.trim().to_string(),
        email: req.email.trim().to_lowercase(),
        smtp_host: req.smtp_host.trim().to_string(),
        smtp_port: req.smtp_port,
        smtp_secure: req.smtp_secure,
        smtp_password_encrypted: cipher.encrypt(&req.smtp_password)?,
        imap_host: req.imap_host.trim().to_string(),
        imap_port: req.imap_port,
        imap_secure: req.imap_secure,
        imap_password_encrypted: cipher.encrypt(&req.imap_password)?,
        created_at: now,
        updated_at: now,
    };
    db::accounts::insert_lead(&pool, &account)
        .await
        .map_err(conflict_on_duplicate_email)?;
    tracing::info!(email = %account.email, "lead account created");
    Ok(Json(ApiResponse::ok(account)))
}

/// GET /accounts/lead
pub async fn list_leads(
    State(pool): State<SqlitePool>,
) -> Result<Json<ApiResponse<Vec<LeadAccount>>>, WarmupError> {
    let accounts = db::accounts::list_leads(&pool).await?;
    Ok(Json(ApiResponse::ok(accounts)))
}

/// DELETE /accounts/lead/:id
pub async fn delete_lead(
    State(pool): State<SqlitePool>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, WarmupError> {
    if !db::accounts::delete_lead(&pool, &id).await? {
        return Err(WarmupError::NotFound(format!("lead account {id} not found")));
    }
    Ok(Json(ApiResponse::message("lead account deleted")))
}

#[derive(Debug, Deserialize)]
pub struct TestConnectionReq {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_secure")]
    pub secure: bool,
    pub username: String,
    pub password: String,
}

/// POST /accounts/test: IMAP login probe, persists nothing.
pub async fn test_connection(
    Json(req): Json<TestConnectionReq>,
) -> Result<Json<ApiResponse<()>>, WarmupError> {
    if req.host.trim().is_empty() || req.username.trim().is_empty() {
        return Err(WarmupError::Validation("host and username are required".into()));
    }
    let endpoint = Endpoint {
        host: req.host.trim().to_string(),
        port: req.port,
        secure: req.secure,
        username: req.username.trim().to_string(),
        password: req.password,
    };
    mail::imap::probe_login(&endpoint)
        .await
        .map_err(|e| WarmupError::Validation(format!("imap login failed: {e:#}")))?;
    Ok(Json(ApiResponse::message("imap login ok")))
}

fn conflict_on_duplicate_email(err: sqlx::Error) -> WarmupError {
    if db::accounts::is_unique_violation(&err) {
        WarmupError::Conflict("an account with this email already exists".into())
    } else {
        WarmupError::Store(err)
    }
}
