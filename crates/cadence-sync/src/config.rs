//! Sync configuration loaded from environment variables.
//!
//! Every setting has a default, so a session can start with zero
//! configuration against a local `cadence-server`.

use std::path::PathBuf;
use std::time::Duration;

use cadence_shared::constants::{
    CHAT_COLLECTION, DEFAULT_APPEND_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_MS, PENDING_STORE_KEY,
};

/// Bounds applied to `CADENCE_APPEND_TIMEOUT_SECS`.
const MIN_APPEND_TIMEOUT_SECS: u64 = 1;
const MAX_APPEND_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote log service.
    /// Env: `CADENCE_REMOTE_URL`
    /// Default: `http://127.0.0.1:8080`
    pub remote_url: String,

    /// Remote collection holding the chat log.
    /// Env: `CADENCE_COLLECTION`
    /// Default: `chat_messages`
    pub collection: String,

    /// Bearer token sent with every remote request.
    /// Env: `CADENCE_API_TOKEN`
    /// Default: none.
    pub api_token: Option<String>,

    /// Upper bound on a single append.
    /// Env: `CADENCE_APPEND_TIMEOUT_SECS` (clamped to 1..=60)
    /// Default: 12 s
    pub append_timeout: Duration,

    /// Interval between snapshot polls of the HTTP log.
    /// Env: `CADENCE_POLL_INTERVAL_MS`
    /// Default: 2000 ms
    pub poll_interval: Duration,

    /// Local store key of the pending queue.
    /// Env: `CADENCE_PENDING_KEY`
    /// Default: `pending_chat_messages`
    pub pending_key: String,

    /// SQLite database file.
    /// Env: `CADENCE_DB_PATH`
    /// Default: none (platform data directory).
    pub database_path: Option<PathBuf>,

    /// Capacity of the engine's command channel.
    pub command_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: "http://127.0.0.1:8080".to_string(),
            collection: CHAT_COLLECTION.to_string(),
            api_token: None,
            append_timeout: Duration::from_secs(DEFAULT_APPEND_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            pending_key: PENDING_STORE_KEY.to_string(),
            database_path: None,
            command_buffer: 64,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("CADENCE_REMOTE_URL") {
            config.remote_url = url;
        }

        if let Some(collection) = lookup("CADENCE_COLLECTION") {
            if !collection.is_empty() {
                config.collection = collection;
            }
        }

        if let Some(token) = lookup("CADENCE_API_TOKEN") {
            if !token.is_empty() {
                config.api_token = Some(token);
            }
        }

        if let Some(val) = lookup("CADENCE_APPEND_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => {
                    let secs = secs.clamp(MIN_APPEND_TIMEOUT_SECS, MAX_APPEND_TIMEOUT_SECS);
                    config.append_timeout = Duration::from_secs(secs);
                }
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid CADENCE_APPEND_TIMEOUT_SECS, using default");
                }
            }
        }

        if let Some(val) = lookup("CADENCE_POLL_INTERVAL_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.poll_interval = Duration::from_millis(ms),
                _ => {
                    tracing::warn!(value = %val, "Invalid CADENCE_POLL_INTERVAL_MS, using default");
                }
            }
        }

        if let Some(key) = lookup("CADENCE_PENDING_KEY") {
            if !key.is_empty() {
                config.pending_key = key;
            }
        }

        if let Some(path) = lookup("CADENCE_DB_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }

        config
    }
}
