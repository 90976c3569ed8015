//! Configuration loading and management

use std::time::Duration;

use anyhow::{Context, Result};

/// Daemon configuration, from environment variables with defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address of the remote processing backend.
    pub backend_addr: String,

    /// Identifier sent with every session; the backend keys cancellation
    /// on it.
    pub hardware_id: String,

    /// How long Processing may run without an end or playback signal.
    pub processing_timeout: Duration,

    /// Attempts to open a session before giving up.
    pub open_retry_limit: u32,

    /// First retry delay; doubles on each subsequent attempt.
    pub backoff_base: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_addr: "127.0.0.1:7700".to_string(),
            hardware_id: "aria-default".to_string(),
            processing_timeout: Duration::from_secs(45),
            open_retry_limit: 3,
            backoff_base: Duration::from_millis(250),
        }
    }
}

impl Config {
    /// Load configuration from the environment. Unset variables fall
    /// back to defaults; malformed values are errors, not silent
    /// fallbacks.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("ARIA_BACKEND_ADDR") {
            config.backend_addr = addr;
        }

        if let Ok(id) = std::env::var("ARIA_HARDWARE_ID") {
            config.hardware_id = id;
        } else if let Ok(hostname) = std::env::var("HOSTNAME") {
            config.hardware_id = hostname;
        }

        if let Ok(secs) = std::env::var("ARIA_PROCESSING_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .context("invalid ARIA_PROCESSING_TIMEOUT_SECS")?;
            config.processing_timeout = Duration::from_secs(secs);
        }

        if let Ok(limit) = std::env::var("ARIA_OPEN_RETRY_LIMIT") {
            config.open_retry_limit = limit.parse().context("invalid ARIA_OPEN_RETRY_LIMIT")?;
        }

        if let Ok(ms) = std::env::var("ARIA_BACKOFF_BASE_MS") {
            let ms: u64 = ms.parse().context("invalid ARIA_BACKOFF_BASE_MS")?;
            config.backoff_base = Duration::from_millis(ms);
        }

        Ok(config)
    }
}
