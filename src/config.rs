use std::env;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// The duration of a session in hours.
    pub session_duration_hours: i64,
    /// The secret the credential vault key is derived from.
    pub session_secret: Zeroizing<String>,
    /// Whether quota checks admit requests when the counter store is down.
    /// Defaults to fail-closed.
    pub quota_fail_open: bool,
    /// Base URL of the OpenRouter API.
    pub openrouter_base_url: String,
    /// Base URL of the Google AI API.
    pub google_ai_base_url: String,
    /// Base URL of the DuckDuckGo Instant Answer API.
    pub duckduckgo_base_url: String,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let session_secret = env::var("SESSION_SECRET")
            .context("SESSION_SECRET must be set (generate with: openssl rand -hex 32)")?;

        if session_secret.len() < 16 {
            anyhow::bail!("SESSION_SECRET must be at least 16 characters");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            session_duration_hours: env::var("SESSION_DURATION_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .context("Invalid SESSION_DURATION_HOURS")?,
            session_secret: Zeroizing::new(session_secret),
            quota_fail_open: env::var("QUOTA_FAIL_OPEN")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            openrouter_base_url: env::var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
            google_ai_base_url: env::var("GOOGLE_AI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            duckduckgo_base_url: env::var("DUCKDUCKGO_BASE_URL")
                .unwrap_or_else(|_| "https://api.duckduckgo.com/".to_string()),
        })
    }
}
