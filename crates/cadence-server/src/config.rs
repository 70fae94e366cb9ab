//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use cadence_shared::constants::MAX_MESSAGE_BYTES;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Bearer token every request must carry.
    /// Env: `API_TOKEN`
    /// Default: empty (no authentication).
    pub api_token: Option<String>,

    /// Largest accepted message body, in bytes after trimming.
    /// Env: `MAX_BODY_BYTES`
    /// Default: 16 KiB
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            api_token: None,
            max_body_bytes: MAX_MESSAGE_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(token) = lookup("API_TOKEN") {
            if !token.is_empty() {
                config.api_token = Some(token);
            }
        }

        if let Some(val) = lookup("MAX_BODY_BYTES") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_body_bytes = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_BODY_BYTES, using default"),
            }
        }

        config
    }
}
