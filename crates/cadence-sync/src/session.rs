//! Session wiring: builds the store, remote log, connectivity monitor and
//! engine for one signed-in user.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use cadence_net::{ConnectivityMonitor, HttpLog, NetworkPlatform, OnlineSignal, RemoteLog};
use cadence_shared::{Author, Message, SyncError};
use cadence_store::{Database, KeyValueStore, PendingQueue};

use crate::author::UserProfile;
use crate::config::SyncConfig;
use crate::engine::{SendOutcome, SyncEngine, SyncHandle};
use crate::events::SyncStatus;

pub struct ChatSession {
    handle: SyncHandle,
    author: Author,
}

impl ChatSession {
    /// Open a session against the SQLite store and HTTP remote log named in
    /// `config`.
    pub async fn open(
        config: &SyncConfig,
        profile: &UserProfile,
        platform: Option<Arc<dyn NetworkPlatform>>,
        fallback: OnlineSignal,
    ) -> anyhow::Result<Self> {
        let db = match &config.database_path {
            Some(path) => Database::open_at(path),
            None => Database::new(),
        }
        .context("failed to open local database")?;

        let stored_photo = db.get(&profile.photo_store_key()).unwrap_or_else(|e| {
            warn!(error = %e, "failed to read stored profile photo");
            None
        });
        let author = profile.to_author(stored_photo);

        let remote = HttpLog::new(
            &config.remote_url,
            &config.collection,
            config.api_token.clone(),
            config.append_timeout,
            config.poll_interval,
        )
        .context("invalid remote log configuration")?;

        Self::open_with(config, author, Box::new(db), Arc::new(remote), platform, fallback).await
    }

    /// Open a session on explicit components.
    pub async fn open_with(
        config: &SyncConfig,
        author: Author,
        store: Box<dyn KeyValueStore>,
        remote: Arc<dyn RemoteLog>,
        platform: Option<Arc<dyn NetworkPlatform>>,
        fallback: OnlineSignal,
    ) -> anyhow::Result<Self> {
        let (queue, report) = PendingQueue::open(store, config.pending_key.clone())
            .context("failed to restore pending queue")?;
        let connectivity = ConnectivityMonitor::start(platform, fallback).await;

        let engine = SyncEngine::new(
            author.clone(),
            queue,
            report,
            remote,
            connectivity,
            config.append_timeout,
        );
        let handle = engine.spawn(config.command_buffer);

        info!(author = %author.id, restored = report.restored, "chat session opened");
        Ok(Self { handle, author })
    }

    pub fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    pub async fn send_message(&self, body: impl Into<String>) -> Result<SendOutcome, SyncError> {
        self.handle.send_message(body).await
    }

    pub fn feed(&self) -> Vec<Message> {
        self.handle.feed()
    }

    pub fn status(&self) -> SyncStatus {
        self.handle.status()
    }

    /// Stop syncing. Anything unsent stays in the local store.
    pub async fn close(self) {
        self.handle.shutdown().await;
        info!(author = %self.author.id, "chat session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cadence_net::MemoryLog;
    use cadence_store::MemoryStore;

    fn profile() -> UserProfile {
        UserProfile {
            uid: "u1".into(),
            display_name: Some("Ada".into()),
            email: None,
            photo_url: None,
        }
    }

    #[tokio::test]
    async fn test_session_on_memory_components() {
        let config = SyncConfig::default();
        let log = MemoryLog::new();
        let session = ChatSession::open_with(
            &config,
            profile().to_author(None),
            Box::new(MemoryStore::new()),
            Arc::new(log.clone()),
            None,
            OnlineSignal::new(true),
        )
        .await
        .unwrap();

        let outcome = session.send_message("hi all").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Sent(_)));

        let mut feed = session.handle().subscribe_feed();
        tokio::time::timeout(Duration::from_secs(5), async {
            while feed.borrow_and_update().is_empty() {
                feed.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        let shown = session.feed();
        assert_eq!(shown[0].body, "hi all");
        assert_eq!(shown[0].author_name, "Ada");
        assert_eq!(log.records().len(), 1);
        session.close().await;
    }

    #[tokio::test]
    async fn test_offline_session_keeps_queue_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig {
            // Nothing listens here; the session stays offline anyway.
            remote_url: "http://127.0.0.1:9".into(),
            database_path: Some(dir.path().join("cadence.db")),
            ..SyncConfig::default()
        };

        {
            let db = Database::open_at(&dir.path().join("cadence.db")).unwrap();
            db.set(&profile().photo_store_key(), "file:///photos/ada.jpg")
                .unwrap();
        }

        let session = ChatSession::open(&config, &profile(), None, OnlineSignal::new(false))
            .await
            .unwrap();
        assert_eq!(session.author().avatar, "file:///photos/ada.jpg");

        let outcome = session.send_message("written on a plane").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Queued(_)));
        session.close().await;

        let session = ChatSession::open(&config, &profile(), None, OnlineSignal::new(false))
            .await
            .unwrap();
        let status = session.status();
        assert!(!status.is_online);
        assert_eq!(status.pending_count, 1);
        assert!(session.feed()[0].pending);
        session.close().await;
    }
}
