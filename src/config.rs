use std::time::Duration;

use crate::error::{AppError, Result};

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const PONISHA_BASE_URL: &str = "https://ponisha.ir";
pub const KARLANCER_BASE_URL: &str = "https://www.karlancer.com";

/// Budget cutoff in toman. A listing qualifies when either bound is strictly above it.
pub const BUDGET_THRESHOLD: i64 = 99_000_000;

/// Maximum simultaneous page requests per source after page 1.
pub const PAGE_CONCURRENCY: usize = 4;

/// Per-page request timeout (seconds), independent of sibling pages.
pub const PAGE_TIMEOUT_SECS: u64 = 15;

/// Timeout applied to every outbound HTTP request by the shared client (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 15;

/// Hard length limit of a single Telegram message, in characters.
pub const MESSAGE_LIMIT: usize = 4096;

/// Minimum spacing between two successful Telegram sends (milliseconds).
pub const MIN_SEND_INTERVAL_MS: u64 = 1200;

/// Segments the delivery queue can buffer before alerts are dropped.
pub const QUEUE_CAPACITY: usize = 1024;

/// How long the delivery worker gets to stop on shutdown (seconds).
pub const NOTIFIER_SHUTDOWN_SECS: u64 = 10;

/// Upper bound for the whole shutdown sequence (seconds).
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

pub fn page_timeout() -> Duration {
    Duration::from_secs(PAGE_TIMEOUT_SECS)
}

pub fn min_send_interval() -> Duration {
    Duration::from_millis(MIN_SEND_INTERVAL_MS)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub http_port: u16,
    pub log_level: String,
    /// Cron expression for scheduled runs (SCRAPE_CRON). Five-field expressions
    /// get a leading seconds field of `0`.
    pub scrape_cron: String,
    pub telegram_token: String,
    pub telegram_chat: String,
    /// Forum topic to post into (TELEGRAM_CHAT_THREAD_ID).
    pub telegram_thread_id: Option<i64>,
    pub telegram_api_url: String,
    pub ponisha_base_url: String,
    pub karlancer_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // .env is optional; real environment wins.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or_default = |key: &str, fallback: &str| get(key).unwrap_or_else(|| fallback.to_string());

        let telegram_token = get("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let telegram_chat = get("TELEGRAM_CHAT_ID").unwrap_or_default();
        if telegram_token.is_empty() || telegram_chat.is_empty() {
            return Err(AppError::Config(
                "missing TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID".to_string(),
            ));
        }

        let telegram_thread_id = match get("TELEGRAM_CHAT_THREAD_ID") {
            Some(raw) => Some(raw.trim().parse::<i64>().map_err(|e| {
                AppError::Config(format!("invalid TELEGRAM_CHAT_THREAD_ID: {e}"))
            })?),
            None => None,
        };

        let http_port = or_default("HTTP_PORT", "3000")
            .trim()
            .parse::<u16>()
            .map_err(|_| AppError::Config("HTTP_PORT must be a valid port number".to_string()))?;

        Ok(Self {
            db_path: or_default("DB_PATH", "projects.db"),
            http_port,
            log_level: or_default("LOG_LEVEL", "info"),
            scrape_cron: or_default("SCRAPE_CRON", "*/7 * * * *"),
            telegram_token,
            telegram_chat,
            telegram_thread_id,
            telegram_api_url: or_default("TELEGRAM_API_URL", TELEGRAM_API_URL),
            ponisha_base_url: or_default("PONISHA_BASE_URL", PONISHA_BASE_URL),
            karlancer_base_url: or_default("KARLANCER_BASE_URL", KARLANCER_BASE_URL),
        })
    }
}
