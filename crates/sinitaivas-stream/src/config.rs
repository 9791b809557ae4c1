// ABOUTME: Streamer configuration loaded from SINITAIVAS_* environment variables.
// ABOUTME: Resolves the home directory, log file, relay endpoint, consumer name, write policy, and retry budget.

use std::path::PathBuf;
use std::time::Duration;

use sinitaivas_store::{DEFAULT_CONSUMER, WritePolicy};
use thiserror::Error;

use crate::retry::RetryPolicy;

pub const DEFAULT_RELAY_URL: &str = "wss://bsky.network/xrpc";

/// Log file name under the home directory when `SINITAIVAS_LOG_FILE` is unset.
pub const DEFAULT_LOG_FILE: &str = "sinitaivas.log";

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the current directory: {0}")]
    CurrentDir(#[from] std::io::Error),

    #[error("SINITAIVAS_RELAY_URL must use ws:// or wss://, got {0:?}")]
    InvalidRelayUrl(String),

    #[error("SINITAIVAS_MAX_ATTEMPTS must be a positive integer, got {0:?}")]
    InvalidMaxAttempts(String),

    #[error("SINITAIVAS_CONSUMER must not be empty")]
    EmptyConsumer,

    #[error("SINITAIVAS_IDLE_TIMEOUT_SECS must be a positive integer, got {0:?}")]
    InvalidIdleTimeout(String),
}

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Data directory holding the partition tree and the checkpoint file.
    pub home: PathBuf,
    /// Destination for warnings and errors, in addition to stderr.
    pub log_file: PathBuf,
    pub relay_url: String,
    /// A subscription that stays silent this long is treated as dropped.
    pub idle_timeout: Duration,
    /// Checkpoint entry name.
    pub consumer: String,
    pub write_policy: WritePolicy,
    pub retry: RetryPolicy,
}

impl StreamerConfig {
    /// Load config from environment variables.
    ///
    /// - `SINITAIVAS_HOME`: data directory (default: current directory)
    /// - `SINITAIVAS_LOG_FILE`: warning and error log (default: `<home>/sinitaivas.log`)
    /// - `SINITAIVAS_RELAY_URL`: relay XRPC root (default: `wss://bsky.network/xrpc`)
    /// - `SINITAIVAS_IDLE_TIMEOUT_SECS`: silence before reconnecting (default: 60)
    /// - `SINITAIVAS_CONSUMER`: checkpoint entry name (default: `streamer`)
    /// - `SINITAIVAS_STRICT_WRITES`: `true`, `1` or `yes` makes write failures fatal
    /// - `SINITAIVAS_MAX_ATTEMPTS`: stream attempts before giving up (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load config through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let home = match lookup("SINITAIVAS_HOME") {
            Some(home) if !home.is_empty() => PathBuf::from(home),
            _ => std::env::current_dir()?,
        };

        let log_file = match lookup("SINITAIVAS_LOG_FILE") {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => home.join(DEFAULT_LOG_FILE),
        };

        let relay_url = lookup("SINITAIVAS_RELAY_URL").unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
        if !(relay_url.starts_with("ws://") || relay_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidRelayUrl(relay_url));
        }

        let idle_timeout = match lookup("SINITAIVAS_IDLE_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs >= 1 => Duration::from_secs(secs),
                _ => return Err(ConfigError::InvalidIdleTimeout(raw)),
            },
            None => DEFAULT_IDLE_TIMEOUT,
        };

        let consumer = lookup("SINITAIVAS_CONSUMER").unwrap_or_else(|| DEFAULT_CONSUMER.to_string());
        if consumer.trim().is_empty() {
            return Err(ConfigError::EmptyConsumer);
        }

        let write_policy = match lookup("SINITAIVAS_STRICT_WRITES")
            .map(|v| v.to_ascii_lowercase())
            .as_deref()
        {
            Some("true" | "1" | "yes") => WritePolicy::Fatal,
            _ => WritePolicy::LogAndContinue,
        };

        let mut retry = RetryPolicy::default();
        if let Some(raw) = lookup("SINITAIVAS_MAX_ATTEMPTS") {
            match raw.trim().parse::<u32>() {
                Ok(attempts) if attempts >= 1 => retry = retry.with_max_attempts(attempts),
                _ => return Err(ConfigError::InvalidMaxAttempts(raw)),
            }
        }

        Ok(Self {
            home,
            log_file,
            relay_url,
            idle_timeout,
            consumer,
            write_policy,
            retry,
        })
    }
}
