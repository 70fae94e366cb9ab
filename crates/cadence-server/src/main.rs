//! # cadence-server
//!
//! Minimal remote log for the Cadence chat core: an append-only, server-
//! ordered record log per collection, served over HTTP.
//!
//! - `POST /v1/collections/:collection/records` appends one record. A record
//!   carrying a `clientId` that is already in the log is not appended twice.
//! - `GET /v1/collections/:collection/records` lists the log in server order.
//!
//! Records are kept in memory only.

mod api;
mod config;
mod error;
mod record_log;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use cadence_shared::constants::APP_NAME;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::record_log::RecordLog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cadence_server=debug")),
        )
        .init();

    info!("Starting {} log server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(
        addr = %config.http_addr,
        auth_enabled = config.api_token.is_some(),
        max_body_bytes = config.max_body_bytes,
        "Loaded configuration"
    );

    let http_addr = config.http_addr;
    let state = AppState {
        log: Arc::new(RecordLog::new()),
        config: Arc::new(config),
    };

    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
