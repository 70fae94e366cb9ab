//! The sync engine: a single task that owns the pending queue and the
//! remote subscription and reacts to sends, connectivity flips, snapshots
//! and append completions one at a time.
//!
//! States:
//!
//! - `Offline`: sends go straight to the pending queue.
//! - `OnlineIdle`: sends are appended directly, falling back to the queue
//!   when the append fails.
//! - `OnlineDraining`: the queue is being replayed oldest first, one append
//!   at a time. Direct sends are still allowed meanwhile.
//!
//! A drain starts when connectivity is restored (or at startup when online)
//! with a non-empty queue, and when a message is queued or a direct append
//! succeeds while online and idle. The first failure halts it. A halted drain
//! resumes on the next restore or the next successful direct append, never
//! on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use cadence_net::{
    ConnectivityMonitor, ConnectivityState, RemoteError, RemoteLog, SnapshotResult, SnapshotStream,
};
use cadence_shared::{
    validate_body, Author, LocalId, Message, MessageId, OutgoingMessage, PendingEntry, SyncError,
};
use cadence_store::{LoadReport, PendingQueue};

use crate::events::{SyncNotification, SyncStatus};
use crate::feed::{acknowledged_ids, merge_feed};

const NOTIFICATION_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    OnlineIdle,
    OnlineDraining,
    Offline,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnlineIdle => "online_idle",
            Self::OnlineDraining => "online_draining",
            Self::Offline => "offline",
        }
    }
}

/// Result of a successful [`SyncHandle::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The remote log acknowledged the message. It shows up in the feed with
    /// the next snapshot.
    Sent(MessageId),
    /// The message is in the pending queue and will be sent on a later drain.
    Queued(LocalId),
}

type SendReply = oneshot::Sender<Result<SendOutcome, SyncError>>;

enum Command {
    Send { body: String, reply: SendReply },
    Shutdown { reply: oneshot::Sender<()> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppendKind {
    Direct,
    Drain,
}

struct AppendDone {
    kind: AppendKind,
    local_id: LocalId,
    result: Result<MessageId, RemoteError>,
}

/// A direct send waiting for its append. The entry is what gets queued if
/// the append fails.
struct DirectSend {
    entry: PendingEntry,
    reply: SendReply,
}

pub struct SyncEngine {
    author: Author,
    queue: PendingQueue,
    remote: Arc<dyn RemoteLog>,
    connectivity: ConnectivityMonitor,
    connectivity_rx: watch::Receiver<ConnectivityState>,
    append_timeout: Duration,

    state: SyncState,
    store_corrupt: bool,
    snapshot: Vec<Message>,
    subscription: Option<SnapshotStream>,

    in_flight: FuturesUnordered<BoxFuture<'static, AppendDone>>,
    direct: HashMap<LocalId, DirectSend>,
    draining: Option<LocalId>,
    drain_sent: usize,
    /// A direct append succeeded while the current drain append was out.
    remote_answered: bool,

    feed_tx: watch::Sender<Vec<Message>>,
    status_tx: watch::Sender<SyncStatus>,
    notify_tx: broadcast::Sender<SyncNotification>,
}

impl SyncEngine {
    /// Build an engine around an already restored queue.
    ///
    /// The initial state comes from the monitor. Nothing happens until
    /// [`spawn`](Self::spawn).
    pub fn new(
        author: Author,
        queue: PendingQueue,
        report: LoadReport,
        remote: Arc<dyn RemoteLog>,
        connectivity: ConnectivityMonitor,
        append_timeout: Duration,
    ) -> Self {
        let connectivity_rx = connectivity.subscribe();
        let state = if connectivity.is_online() {
            SyncState::OnlineIdle
        } else {
            SyncState::Offline
        };

        let feed = merge_feed(&[], queue.entries(), &author.id);
        let (feed_tx, _) = watch::channel(feed);

        let conn = connectivity.state();
        let (status_tx, _) = watch::channel(SyncStatus {
            state,
            is_online: conn.online,
            connection_type: conn.connection_type,
            pending_count: queue.len(),
            is_syncing: false,
            subscribed: false,
            store_corrupt: report.corrupt,
        });
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_BUFFER);

        if let Some(e) = report.error() {
            warn!(error = %e, "some unsent messages may have been lost");
        }

        Self {
            author,
            queue,
            remote,
            connectivity,
            connectivity_rx,
            append_timeout,
            state,
            store_corrupt: report.corrupt,
            snapshot: Vec::new(),
            subscription: None,
            in_flight: FuturesUnordered::new(),
            direct: HashMap::new(),
            draining: None,
            drain_sent: 0,
            remote_answered: false,
            feed_tx,
            status_tx,
            notify_tx,
        }
    }

    /// Subscribe before spawning to be sure to see startup notifications.
    pub fn notifications(&self) -> broadcast::Receiver<SyncNotification> {
        self.notify_tx.subscribe()
    }

    /// Start the event loop on the current runtime.
    pub fn spawn(self, command_buffer: usize) -> SyncHandle {
        let (commands, command_rx) = mpsc::channel(command_buffer.max(1));
        let handle = SyncHandle {
            commands,
            feed_rx: self.feed_tx.subscribe(),
            status_rx: self.status_tx.subscribe(),
            notify_tx: self.notify_tx.clone(),
        };
        tokio::spawn(self.run(command_rx));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.startup();

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(Command::Send { body, reply }) => self.handle_send(body, reply),
                        Some(Command::Shutdown { reply }) => {
                            self.shutdown();
                            let _ = reply.send(());
                            break;
                        }
                        None => {
                            self.shutdown();
                            break;
                        }
                    }
                }

                Ok(()) = self.connectivity_rx.changed() => {
                    let online = self.connectivity_rx.borrow_and_update().online;
                    self.on_connectivity(online);
                }

                item = next_snapshot(&mut self.subscription) => self.on_snapshot(item),

                Some(done) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.on_append_done(done);
                }
            }
        }
    }

    fn startup(&mut self) {
        info!(
            state = self.state.as_str(),
            pending = self.queue.len(),
            "sync engine started"
        );

        if self.store_corrupt {
            self.notify(SyncNotification::StoreCorrupt);
        }

        if self.state != SyncState::Offline {
            self.ensure_subscribed();
            if !self.queue.is_empty() {
                self.start_drain();
            }
        }
        self.publish_status();
    }

    // -----------------------------------------------------------------------
    // Sends
    // -----------------------------------------------------------------------

    fn handle_send(&mut self, body: String, reply: SendReply) {
        let body = match validate_body(&body) {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "message refused locally");
                let _ = reply.send(Err(e));
                return;
            }
        };

        let entry = PendingEntry::compose(&self.author, body);

        if self.state == SyncState::Offline {
            let _ = reply.send(self.enqueue(entry));
            return;
        }

        let local_id = entry.local_id.clone();
        let outgoing = entry.to_outgoing(&self.author.id);
        debug!(local_id = %local_id, "sending directly");
        self.direct.insert(local_id.clone(), DirectSend { entry, reply });
        self.start_append(AppendKind::Direct, local_id, outgoing);
    }

    fn enqueue(&mut self, entry: PendingEntry) -> Result<SendOutcome, SyncError> {
        let local_id = entry.local_id.clone();
        self.queue.enqueue_entry(entry)?;
        info!(local_id = %local_id, pending = self.queue.len(), "message queued");
        self.publish_feed();
        self.publish_status();
        Ok(SendOutcome::Queued(local_id))
    }

    fn start_append(&mut self, kind: AppendKind, local_id: LocalId, outgoing: OutgoingMessage) {
        let remote = self.remote.clone();
        let timeout = self.append_timeout;
        self.in_flight.push(
            async move {
                let result = match tokio::time::timeout(timeout, remote.append(&outgoing)).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::Unavailable(format!(
                        "append timed out after {}s",
                        timeout.as_secs()
                    ))),
                };
                AppendDone {
                    kind,
                    local_id,
                    result,
                }
            }
            .boxed(),
        );
    }

    fn on_append_done(&mut self, done: AppendDone) {
        match done.kind {
            AppendKind::Direct => self.on_direct_done(done.local_id, done.result),
            AppendKind::Drain => self.on_drain_done(done.local_id, done.result),
        }
    }

    fn on_direct_done(&mut self, local_id: LocalId, result: Result<MessageId, RemoteError>) {
        let Some(send) = self.direct.remove(&local_id) else {
            return;
        };

        let outcome = match result {
            Ok(id) => {
                info!(local_id = %local_id, id = %id, "message sent");
                self.remote_answered = true;
                Ok(SendOutcome::Sent(id))
            }
            Err(e @ RemoteError::Rejected(_)) => {
                warn!(local_id = %local_id, error = %e, "remote rejected message");
                Err(e.into())
            }
            Err(RemoteError::Unavailable(reason)) => {
                if let Some(id) = self.acknowledged_id(&local_id) {
                    // The record landed even though the acknowledgment did not.
                    debug!(local_id = %local_id, id = %id, "append failed but record is in the log");
                    Ok(SendOutcome::Sent(id))
                } else {
                    warn!(local_id = %local_id, reason = %reason, "direct send failed, queueing");
                    self.enqueue(send.entry)
                }
            }
        };

        let _ = send.reply.send(outcome);

        // Queued entries go out now, not on the next connectivity flip.
        if self.state == SyncState::OnlineIdle && !self.queue.is_empty() {
            self.start_drain();
            self.publish_status();
        }
    }

    // -----------------------------------------------------------------------
    // Drain
    // -----------------------------------------------------------------------

    fn start_drain(&mut self) {
        self.transition(SyncState::OnlineDraining);
        if self.draining.is_none() {
            self.drain_sent = 0;
            info!(pending = self.queue.len(), "draining pending messages");
            self.drain_next();
        }
    }

    fn drain_next(&mut self) {
        let Some(entry) = self.queue.front() else {
            self.finish_drain();
            return;
        };

        let local_id = entry.local_id.clone();
        let outgoing = entry.to_outgoing(&self.author.id);
        debug!(local_id = %local_id, "draining entry");
        self.draining = Some(local_id.clone());
        self.remote_answered = false;
        self.start_append(AppendKind::Drain, local_id, outgoing);
    }

    fn on_drain_done(&mut self, local_id: LocalId, result: Result<MessageId, RemoteError>) {
        self.draining = None;

        match result {
            Ok(id) => {
                debug!(local_id = %local_id, id = %id, "drained entry acknowledged");
                self.drain_sent += 1;
                if let Err(e) = self.queue.remove(&local_id) {
                    // Stays queued; the next snapshot reconciles it.
                    warn!(local_id = %local_id, error = %e, "failed to remove drained entry");
                    self.halt_drain();
                    return;
                }
            }
            Err(RemoteError::Rejected(reason)) => {
                warn!(local_id = %local_id, reason = %reason, "remote rejected queued message, dropping it");
                if let Err(e) = self.queue.remove(&local_id) {
                    warn!(local_id = %local_id, error = %e, "failed to drop rejected entry");
                    self.halt_drain();
                    return;
                }
                self.notify(SyncNotification::MessageDropped { local_id, reason });
            }
            Err(RemoteError::Unavailable(reason))
                if self.remote_answered && self.state == SyncState::OnlineDraining =>
            {
                debug!(
                    local_id = %local_id,
                    reason = %reason,
                    "drain append failed while direct sends succeed, retrying"
                );
                self.drain_next();
                return;
            }
            Err(RemoteError::Unavailable(reason)) => {
                warn!(local_id = %local_id, reason = %reason, "drain halted");
                self.halt_drain();
                return;
            }
        }

        self.publish_feed();
        if self.state == SyncState::OnlineDraining {
            self.drain_next();
        } else {
            self.halt_drain();
        }
        self.publish_status();
    }

    fn finish_drain(&mut self) {
        info!(sent = self.drain_sent, "drain complete");
        self.notify(SyncNotification::DrainFinished {
            sent: self.drain_sent,
            remaining: 0,
        });
        self.transition(SyncState::OnlineIdle);
    }

    /// Stop draining and leave the rest queued for the next restore.
    fn halt_drain(&mut self) {
        let remaining = self.queue.len();
        info!(sent = self.drain_sent, remaining, "drain stopped");
        self.notify(SyncNotification::DrainFinished {
            sent: self.drain_sent,
            remaining,
        });
        if self.state == SyncState::OnlineDraining {
            self.transition(SyncState::OnlineIdle);
        }
        self.publish_feed();
        self.publish_status();
    }

    // -----------------------------------------------------------------------
    // Connectivity
    // -----------------------------------------------------------------------

    fn on_connectivity(&mut self, online: bool) {
        if !online {
            if let Some(stream) = self.subscription.take() {
                stream.unsubscribe();
            }
            self.transition(SyncState::Offline);
            self.publish_status();
            return;
        }

        // The monitor only wakes us on flips, so an "online" seen while we
        // still think we are online means an offline period was coalesced.
        if self.state != SyncState::Offline {
            debug!("connectivity restored without an observed loss");
        }

        self.ensure_subscribed();
        if self.queue.is_empty() {
            self.transition(SyncState::OnlineIdle);
        } else {
            self.start_drain();
        }
        self.publish_status();
    }

    // -----------------------------------------------------------------------
    // Remote snapshots
    // -----------------------------------------------------------------------

    fn ensure_subscribed(&mut self) {
        if self.subscription.is_none() {
            debug!("opening remote subscription");
            self.subscription = Some(self.remote.subscribe());
        }
    }

    fn on_snapshot(&mut self, item: Option<SnapshotResult>) {
        match item {
            Some(Ok(snapshot)) => {
                debug!(records = snapshot.len(), "remote snapshot");
                self.snapshot = snapshot;
                self.reconcile();
                self.publish_feed();
            }
            Some(Err(e)) => self.lose_subscription(e.to_string()),
            None => self.lose_subscription("subscription ended".to_string()),
        }
        self.publish_status();
    }

    /// Drop every queued entry the snapshot shows as acknowledged.
    fn reconcile(&mut self) {
        let acked = acknowledged_ids(&self.snapshot);
        match self.queue.retain_unacknowledged(&acked) {
            Ok(removed) if !removed.is_empty() => {
                info!(
                    removed = removed.len(),
                    pending = self.queue.len(),
                    "pending messages confirmed by snapshot"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to reconcile pending queue"),
        }
    }

    fn lose_subscription(&mut self, reason: String) {
        // Treated like an unreachable remote: the queue is untouched and the
        // last snapshot stays on screen until the next restore.
        warn!(reason = %reason, "remote subscription lost");
        self.subscription = None;
        self.notify(SyncNotification::SubscriptionLost { reason });
    }

    fn acknowledged_id(&self, local_id: &LocalId) -> Option<MessageId> {
        self.snapshot
            .iter()
            .find(|m| m.client_id.as_ref() == Some(local_id))
            .map(|m| MessageId(m.id.clone()))
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    fn shutdown(&mut self) {
        // Unanswered direct sends must not be lost.
        let direct: Vec<_> = self.direct.drain().collect();
        for (local_id, send) in direct {
            let outcome = match self.acknowledged_id(&local_id) {
                Some(id) => Ok(SendOutcome::Sent(id)),
                None => self.enqueue(send.entry),
            };
            let _ = send.reply.send(outcome);
        }

        self.in_flight.clear();
        self.draining = None;
        if let Some(stream) = self.subscription.take() {
            stream.unsubscribe();
        }
        info!(pending = self.queue.len(), "sync engine stopped");
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    fn transition(&mut self, to: SyncState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        info!(from = from.as_str(), to = to.as_str(), "sync state changed");
        self.notify(SyncNotification::StateChanged { from, to });
    }

    fn notify(&self, notification: SyncNotification) {
        // No receivers is fine.
        let _ = self.notify_tx.send(notification);
    }

    fn publish_feed(&self) {
        let feed = merge_feed(&self.snapshot, self.queue.entries(), &self.author.id);
        self.feed_tx.send_if_modified(|current| {
            if *current == feed {
                return false;
            }
            *current = feed;
            true
        });
    }

    fn publish_status(&self) {
        let conn = self.connectivity.state();
        let status = SyncStatus {
            state: self.state,
            is_online: conn.online,
            connection_type: conn.connection_type,
            pending_count: self.queue.len(),
            is_syncing: self.state == SyncState::OnlineDraining,
            subscribed: self.subscription.is_some(),
            store_corrupt: self.store_corrupt,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

async fn next_snapshot(subscription: &mut Option<SnapshotStream>) -> Option<SnapshotResult> {
    match subscription {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}

/// Cloneable front end of a running [`SyncEngine`].
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    feed_rx: watch::Receiver<Vec<Message>>,
    status_rx: watch::Receiver<SyncStatus>,
    notify_tx: broadcast::Sender<SyncNotification>,
}

impl SyncHandle {
    /// Send a chat message.
    ///
    /// Returns once the message is either acknowledged by the remote log or
    /// safely queued. Only local validation, a store failure or a remote
    /// rejection are reported as errors.
    pub async fn send_message(&self, body: impl Into<String>) -> Result<SendOutcome, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                body: body.into(),
                reply,
            })
            .await
            .map_err(|_| SyncError::EngineStopped)?;
        rx.await.map_err(|_| SyncError::EngineStopped)?
    }

    /// Current merged feed.
    pub fn feed(&self) -> Vec<Message> {
        self.feed_rx.borrow().clone()
    }

    pub fn subscribe_feed(&self) -> watch::Receiver<Vec<Message>> {
        self.feed_rx.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    pub fn notifications(&self) -> broadcast::Receiver<SyncNotification> {
        self.notify_tx.subscribe()
    }

    /// Stop the engine. Direct sends still waiting for the remote log are
    /// queued first.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}
