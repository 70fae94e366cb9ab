//! Remote log client boundary.
//!
//! The remote side is an append-only, server-ordered message log. Appends
//! are single network writes; reads are long-lived subscriptions that yield
//! the full ordered snapshot on every change, never a delta.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cadence_shared::{Message, MessageId, OutgoingMessage, SyncError};

/// Snapshot buffer between a producer task and its consumer.
const SNAPSHOT_BUFFER: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport error, timeout or server-side failure.
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// The remote refused the payload (validation, size, ...).
    #[error("Remote rejected: {0}")]
    Rejected(String),
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Unavailable(reason) => SyncError::RemoteUnavailable(reason),
            RemoteError::Rejected(reason) => SyncError::RemoteRejected(reason),
        }
    }
}

/// One subscription update: the complete ordered log, or a fatal error.
pub type SnapshotResult = Result<Vec<Message>, RemoteError>;

/// Ordered append-only message log.
#[async_trait]
pub trait RemoteLog: Send + Sync {
    /// Append one record and return the id the server assigned to it.
    ///
    /// On error the caller must not assume the record was or was not written.
    async fn append(&self, message: &OutgoingMessage) -> Result<MessageId, RemoteError>;

    /// Open an ordered subscription starting from the beginning of the log.
    fn subscribe(&self) -> SnapshotStream;
}

/// Cancellable stream of full snapshots.
///
/// The stream is lazy and cannot be restarted: it ends after the first
/// `Err` item, when the producer stops, or once [`unsubscribe`] is called.
/// Dropping the stream also stops the producer.
///
/// [`unsubscribe`]: SnapshotStream::unsubscribe
pub struct SnapshotStream {
    rx: mpsc::Receiver<SnapshotResult>,
    producer: Option<JoinHandle<()>>,
    finished: bool,
}

impl SnapshotStream {
    /// Spawn `producer` on the runtime; whatever it sends becomes the stream.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<SnapshotResult>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let handle = tokio::spawn(producer(tx));
        Self {
            rx,
            producer: Some(handle),
            finished: false,
        }
    }

    /// Stop the producer and end the stream.
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
        self.rx.close();
        self.finished = true;
    }
}

impl Stream for SnapshotStream {
    type Item = SnapshotResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Err(e))) => {
                self.stop();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for SnapshotStream {
    fn drop(&mut self) {
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for SnapshotStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStream")
            .field("finished", &self.finished)
            .finish()
    }
}
