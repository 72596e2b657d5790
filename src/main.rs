use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mailwarm::config::Config;
use mailwarm::crypto::CredentialCipher;
use mailwarm::db;
use mailwarm::mail::imap::ImapWatcher;
use mailwarm::mail::smtp::LettreSender;
use mailwarm::mail::{MailSender, MailboxWatcher};
use mailwarm::routes::{self, AppState};
use mailwarm::services::textgen::{ComposeText, HttpTextGenerator};
use mailwarm::services::warmup::WarmupManager;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mailwarm=debug")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = db::connect(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    let cipher = Arc::new(CredentialCipher::from_base64_key(&config.encryption_key)?);
    let sender: Arc<dyn MailSender> = Arc::new(LettreSender::new());
    let watcher: Arc<dyn MailboxWatcher> = Arc::new(ImapWatcher::new());
    let composer: Arc<dyn ComposeText> = Arc::new(HttpTextGenerator::new(&config.textgen)?);

    let manager = Arc::new(WarmupManager::new(
        pool.clone(),
        config.warmup.clone(),
        cipher.clone(),
        sender,
        watcher,
        composer,
    ));

    let state = AppState {
        pool: pool.clone(),
        manager: manager.clone(),
        cipher,
    };
    let app = routes::build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tracing::info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // pause live sessions so they restart cleanly, then release the store
    manager.shutdown_all().await;
    pool.close().await;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let term = async {
        if let Ok(mut s) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            s.recv().await;
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();
    tokio::select! { _ = ctrl_c => {}, _ = term => {} }
}
