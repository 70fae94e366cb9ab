//! # cadence-sync
//!
//! Offline-first synchronization of the group chat.
//!
//! The [`SyncEngine`] owns the durable pending queue, the connectivity
//! monitor and the remote log subscription, and runs as a single tokio task.
//! The presentation layer talks to it through a [`SyncHandle`]: it sends
//! messages and watches the merged feed and the sync status.

pub mod author;
pub mod config;
pub mod engine;
pub mod events;
pub mod feed;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use author::UserProfile;
pub use config::SyncConfig;
pub use engine::{SendOutcome, SyncEngine, SyncHandle, SyncState};
pub use events::{SyncNotification, SyncStatus};
pub use feed::merge_feed;
pub use session::ChatSession;

/// Install the default `tracing` subscriber.
///
/// `RUST_LOG` overrides the built-in filter. Calling this more than once is
/// harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("cadence_sync=debug,cadence_net=debug,cadence_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
