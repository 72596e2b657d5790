//! Pool setup, migrations and shared persistence helpers.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod accounts;
pub mod mail_log;
pub mod sessions;

/// Migration files, embedded so in-memory databases can migrate too.
const MIGRATIONS: &[&str] = &[include_str!("../../migrations/001_init.sql")];

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let url = ensure_sqlite_path(&normalize_sqlite_url(database_url));
    // A shared-nothing :memory: pool would give every connection its own
    // database; cap it at one connection.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for sql in MIGRATIONS {
        sqlx::raw_sql(sql).execute(pool).await?;
    }
    Ok(())
}

pub fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Calendar day in the server's time zone, `YYYY-MM-DD`.
pub fn today() -> String {
    chrono::Local::now().date_naive().to_string()
}

/// Accept forms: sqlite:foo.db, sqlite://foo.db, file:foo.db, bare path.
fn normalize_sqlite_url(input: &str) -> String {
    if input.starts_with("sqlite://") || input.starts_with("sqlite::memory:") {
        return input.to_string();
    }
    if input.starts_with("sqlite:") {
        let rest = input.trim_start_matches("sqlite:");
        return format!("sqlite://{}", rest.trim_start_matches('/'));
    }
    if input.starts_with("file:") {
        return format!("sqlite://{}", input.trim_start_matches("file:"));
    }
    format!("sqlite://{}", input)
}

/// Ensure the SQLite file and its parent folder exist for file-backed URLs.
fn ensure_sqlite_path(db_url: &str) -> String {
    let path_part = db_url.trim_start_matches("sqlite://");
    if path_part == ":memory:" || db_url.starts_with("sqlite::memory:") {
        return db_url.to_string();
    }
    let (path_only, _) = match path_part.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_part, None),
    };
    if !path_only.is_empty() {
        let p = std::path::Path::new(path_only);
        if let Some(parent) = p.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let _ = std::fs::OpenOptions::new().create(true).append(true).open(p);
    }
    db_url.to_string()
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = connect("sqlite::memory:").await.expect("memory pool");
    run_migrations(&pool).await.expect("migrate");
    pool
}
