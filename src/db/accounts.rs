//! Domain and lead account queries.

use sqlx::SqlitePool;

use crate::models::account::{AccountStatus, DomainAccount, LeadAccount};

const DOMAIN_COLUMNS: &str = "id, name, email, smtp_host, smtp_port, smtp_secure, \
     smtp_password_encrypted, imap_host, imap_port, imap_secure, \
     imap_password_encrypted, status, created_at, updated_at";

const LEAD_COLUMNS: &str = "id, name, email, smtp_host, smtp_port, smtp_secure, \
     smtp_password_encrypted, imap_host, imap_port, imap_secure, \
     imap_password_encrypted, created_at, updated_at";

pub async fn insert_domain(
    pool: &SqlitePool,
    account: &DomainAccount,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO domain_accounts (id, name, email, smtp_host, smtp_port, smtp_secure, \
         smtp_password_encrypted, imap_host, imap_port, imap_secure, imap_password_encrypted, \
         status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&account.id)
    .bind(&account.name)
    .bind(&account.email)
    .bind(&account.smtp_host)
    .bind(account.smtp_port)
    .bind(account.smtp_secure)
    .bind(&account.smtp_password_encrypted)
    .bind(&account.imap_host)
    .bind(account.imap_port)
    .bind(account.imap_secure)
    .bind(&account.imap_password_encrypted)
    .bind(account.status.as_str())
    .bind(account.created_at)
    .bind(account.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_domain(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<DomainAccount>, sqlx::Error> {
    sqlx::query_as::<_, DomainAccount>(&format!(
        "SELECT {DOMAIN_COLUMNS} FROM domain_accounts WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn list_domains(pool: &SqlitePool) -> Result<Vec<DomainAccount>, sqlx::Error> {
    sqlx::query_as::<_, DomainAccount>(&format!(
        "SELECT {DOMAIN_COLUMNS} FROM domain_accounts ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await
}

pub async fn delete_domain(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query("DELETE FROM warmup_sessions WHERE domain_account_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    let result = sqlx::query("DELETE FROM domain_accounts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_domain_status(
    pool: &SqlitePool,
    id: &str,
    status: AccountStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE domain_accounts SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(super::now_epoch())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_lead(pool: &SqlitePool, account: &LeadAccount) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO lead_accounts (id, name, email, smtp_host, smtp_port, smtp_secure, \
         smtp_password_encrypted, imap_host, imap_port, imap_secure, imap_password_encrypted, \
         created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&account.id)
    .bind(&account.name)
    .bind(&account.email)
    .bind(&account.smtp_host)
    .bind(account.smtp_port)
    .bind(account.smtp_secure)
    .bind(&account.smtp_password_encrypted)
    .bind(&account.imap_host)
    .bind(account.imap_port)
    .bind(account.imap_secure)
    .bind(&account.imap_password_encrypted)
    .bind(account.created_at)
    .bind(account.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// The lead roster in its stable total order. Appending a lead extends the
/// sequence; it never reorders, so `current_lead_index` stays meaningful
/// across restarts. rowid breaks ties between leads created within the same
/// second.
pub async fn list_leads(pool: &SqlitePool) -> Result<Vec<LeadAccount>, sqlx::Error> {
    sqlx::query_as::<_, LeadAccount>(&format!(
        "SELECT {LEAD_COLUMNS} FROM lead_accounts ORDER BY created_at ASC, rowid ASC"
    ))
    .fetch_all(pool)
    .await
}

pub async fn delete_lead(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM lead_accounts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}
