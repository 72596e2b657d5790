use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Process-wide configuration, read once at startup.
pub struct Config {
    pub database_url: String,
    pub http_port: u16,
    /// Base64-encoded 32-byte key for credential-at-rest encryption.
    pub encryption_key: String,
    pub textgen: TextGenConfig,
    pub warmup: WarmupConfig,
}

#[derive(Clone)]
pub struct TextGenConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

/// Pacing knobs for the warm-up state machine. All durations come from
/// millisecond environment variables with production defaults.
#[derive(Debug, Clone)]
pub struct WarmupConfig {
    /// Inter-lead delay bounds (default 3-5 min).
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound granted to a mailbox subscription before the lead is skipped.
    pub imap_wait_timeout: Duration,
    /// Fallback UNSEEN scan cadence while a subscription is open.
    pub poll_interval: Duration,
    /// Delay between a lead receiving mail and sending its reply (default 3-5 min).
    pub reply_delay_min: Duration,
    pub reply_delay_max: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let encryption_key = env::var("ENCRYPTION_KEY")
            .context("ENCRYPTION_KEY must be set (base64, 32 bytes decoded)")?;
        let textgen = TextGenConfig {
            api_url: env::var("TEXTGEN_API_URL").context("TEXTGEN_API_URL must be set")?,
            api_key: env::var("TEXTGEN_API_KEY").context("TEXTGEN_API_KEY must be set")?,
            model: env::var("TEXTGEN_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
        };
        let http_port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3030);

        Ok(Config {
            database_url,
            http_port,
            encryption_key,
            textgen,
            warmup: WarmupConfig::from_env(),
        })
    }
}

impl WarmupConfig {
    pub fn from_env() -> Self {
        WarmupConfig {
            min_delay: env_ms("MIN_DELAY_MS", 180_000),
            max_delay: env_ms("MAX_DELAY_MS", 300_000),
            imap_wait_timeout: env_ms("IMAP_WAIT_TIMEOUT_MS", 600_000),
            poll_interval: env_ms("POLL_INTERVAL_MS", 30_000),
            reply_delay_min: env_ms("REPLY_HUMAN_DELAY_MIN_MS", 180_000),
            reply_delay_max: env_ms("REPLY_HUMAN_DELAY_MAX_MS", 300_000),
        }
    }
}

impl Default for WarmupConfig {
    fn default() -> Self {
        WarmupConfig {
            min_delay: Duration::from_millis(180_000),
            max_delay: Duration::from_millis(300_000),
            imap_wait_timeout: Duration::from_millis(600_000),
            poll_interval: Duration::from_millis(30_000),
            reply_delay_min: Duration::from_millis(180_000),
            reply_delay_max: Duration::from_millis(300_000),
        }
    }
}

fn env_ms(name: &str, default_ms: u64) -> Duration {
    let ms = env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pacing_matches_production_values() {
        let cfg = WarmupConfig::default();
        assert_eq!(cfg.min_delay, Duration::from_secs(180));
        assert_eq!(cfg.max_delay, Duration::from_secs(300));
        assert_eq!(cfg.imap_wait_timeout, Duration::from_secs(600));
        assert_eq!(cfg.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.reply_delay_min, Duration::from_secs(180));
        assert_eq!(cfg.reply_delay_max, Duration::from_secs(300));
    }
}
