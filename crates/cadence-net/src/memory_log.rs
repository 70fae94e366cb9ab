//! In-process remote log.
//!
//! Behaves like the real service (server-assigned ids and strictly
//! increasing timestamps, idempotent appends by `client_id`, full-snapshot
//! subscriptions) and adds switches to simulate outages, hangs, rejections
//! and revoked subscriptions. Clones share the same log.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use cadence_shared::{LogRecord, Message, MessageId, OutgoingMessage};

use crate::remote::{RemoteError, RemoteLog, SnapshotStream};

/// How [`MemoryLog::append`] responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppendMode {
    /// Commit and acknowledge.
    #[default]
    Accept,
    /// Fail immediately with [`RemoteError::Unavailable`].
    Unavailable,
    /// Never answer and never commit.
    Hang,
    /// Commit, then never answer (the acknowledgment is lost).
    CommitThenHang,
}

#[derive(Debug, Default)]
struct LogState {
    records: Vec<LogRecord>,
    revoked: Option<String>,
}

#[derive(Debug, Default)]
struct Control {
    mode: AppendMode,
    reject_next: Option<String>,
    hang_next: bool,
    attempts: Vec<OutgoingMessage>,
}

#[derive(Debug, Clone)]
pub struct MemoryLog {
    state: Arc<watch::Sender<LogState>>,
    control: Arc<Mutex<Control>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LogState::default());
        Self {
            state: Arc::new(state),
            control: Arc::new(Mutex::new(Control::default())),
        }
    }

    pub fn set_mode(&self, mode: AppendMode) {
        self.control().mode = mode;
    }

    /// Reject the next append (whatever the mode) with `reason`.
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.control().reject_next = Some(reason.into());
    }

    /// Leave the next append unanswered and uncommitted, whatever the mode.
    pub fn hang_next(&self) {
        self.control().hang_next = true;
    }

    /// End every live subscription with an error, and fail new ones, until
    /// [`restore_subscriptions`](Self::restore_subscriptions) is called.
    pub fn revoke_subscriptions(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.state.send_modify(|state| state.revoked = Some(reason));
    }

    pub fn restore_subscriptions(&self) {
        self.state.send_if_modified(|state| state.revoked.take().is_some());
    }

    /// Every record handed to `append`, in call order, including failures.
    pub fn attempts(&self) -> Vec<OutgoingMessage> {
        self.control().attempts.clone()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.state.borrow().records.clone()
    }

    /// Current log as acknowledged messages.
    pub fn messages(&self) -> Vec<Message> {
        snapshot(&self.state.borrow().records)
    }

    fn control(&self) -> std::sync::MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit(&self, message: &OutgoingMessage) -> MessageId {
        let mut assigned = None;
        self.state.send_if_modified(|state| {
            if let Some(existing) = message.client_id.as_ref().and_then(|cid| {
                state
                    .records
                    .iter()
                    .find(|r| r.message.client_id.as_ref() == Some(cid))
            }) {
                assigned = Some(existing.id.clone());
                return false;
            }

            let id = MessageId(Uuid::new_v4().simple().to_string());
            let created_at = next_timestamp(state.records.last().map(|r| r.created_at));
            state.records.push(LogRecord {
                id: id.clone(),
                created_at,
                message: message.clone(),
            });
            assigned = Some(id);
            true
        });

        let id = assigned.unwrap_or_else(|| MessageId(Uuid::new_v4().simple().to_string()));
        debug!(id = %id, "memory log committed record");
        id
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteLog for MemoryLog {
    async fn append(&self, message: &OutgoingMessage) -> Result<MessageId, RemoteError> {
        let (mode, rejection, hang) = {
            let mut control = self.control();
            control.attempts.push(message.clone());
            (
                control.mode,
                control.reject_next.take(),
                std::mem::take(&mut control.hang_next),
            )
        };

        if let Some(reason) = rejection {
            return Err(RemoteError::Rejected(reason));
        }
        if hang {
            futures::future::pending::<()>().await;
        }

        match mode {
            AppendMode::Accept => Ok(self.commit(message)),
            AppendMode::Unavailable => Err(RemoteError::Unavailable("memory log offline".into())),
            AppendMode::Hang => {
                futures::future::pending::<()>().await;
                Err(RemoteError::Unavailable("memory log hung".into()))
            }
            AppendMode::CommitThenHang => {
                self.commit(message);
                futures::future::pending::<()>().await;
                Err(RemoteError::Unavailable("memory log hung".into()))
            }
        }
    }

    fn subscribe(&self) -> SnapshotStream {
        let mut rx = self.state.subscribe();
        SnapshotStream::spawn(|tx| async move {
            loop {
                let item = {
                    let state = rx.borrow_and_update();
                    match &state.revoked {
                        Some(reason) => Err(RemoteError::Unavailable(reason.clone())),
                        None => Ok(snapshot(&state.records)),
                    }
                };
                let fatal = item.is_err();
                if tx.send(item).await.is_err() || fatal {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

fn snapshot(records: &[LogRecord]) -> Vec<Message> {
    records.iter().cloned().map(LogRecord::into_message).collect()
}

/// Server clock that never goes backwards.
fn next_timestamp(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match last {
        Some(last) if last >= now => last + chrono::Duration::microseconds(1),
        _ => now,
    }
}
