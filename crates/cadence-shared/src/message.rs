//! Chat data model.
//!
//! A [`Message`] shown to the user is either materialized from the remote log
//! (authoritative, immutable) or projected from a [`PendingEntry`] held in the
//! local queue (provisional). [`OutgoingMessage`] is the record handed to the
//! remote log when appending.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_MESSAGE_BYTES;
use crate::error::SyncError;
use crate::types::{LocalId, MessageId};

// ---------------------------------------------------------------------------
// Author
// ---------------------------------------------------------------------------

/// The signed-in user as it appears on outgoing messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: String,
    pub name: String,
    /// Opaque avatar reference (usually a URL).
    pub avatar: String,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat entry as displayed in the feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server id once persisted, local id while pending.
    pub id: String,
    /// Local id the sender attached when appending, used to match a pending
    /// entry with its acknowledged record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<LocalId>,
    pub author_id: String,
    pub author_name: String,
    pub author_avatar: String,
    pub body: String,
    /// Server time once persisted, enqueue time while pending.
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub pending: bool,
}

impl Message {
    /// Build an acknowledged message from a remote record.
    pub fn acknowledged(
        id: MessageId,
        created_at: DateTime<Utc>,
        record: OutgoingMessage,
    ) -> Self {
        Self {
            id: id.0,
            client_id: record.client_id,
            author_id: record.author_id,
            author_name: record.author_name,
            author_avatar: record.author_avatar,
            body: record.body,
            created_at,
            pending: false,
        }
    }

    /// Project a queued entry into the feed.
    pub fn from_pending(entry: &PendingEntry, author_id: &str) -> Self {
        Self {
            id: entry.local_id.0.clone(),
            client_id: Some(entry.local_id.clone()),
            author_id: author_id.to_string(),
            author_name: entry.author_name.clone(),
            author_avatar: entry.author_avatar.clone(),
            body: entry.body.clone(),
            created_at: entry.enqueued_at,
            pending: true,
        }
    }
}

// ---------------------------------------------------------------------------
// PendingEntry
// ---------------------------------------------------------------------------

/// Durable record of a message that has not been acknowledged by the remote
/// log. Owned by the pending queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub local_id: LocalId,
    pub body: String,
    pub enqueued_at: DateTime<Utc>,
    pub author_name: String,
    pub author_avatar: String,
}

impl PendingEntry {
    pub fn new(body: String, author_name: String, author_avatar: String) -> Self {
        Self {
            local_id: LocalId::generate(),
            body,
            enqueued_at: Utc::now(),
            author_name,
            author_avatar,
        }
    }

    /// A fresh entry written by `author` now.
    pub fn compose(author: &Author, body: String) -> Self {
        Self::new(body, author.name.clone(), author.avatar.clone())
    }

    /// The record to append when this entry is sent.
    ///
    /// The original compose time is kept so the remote log can tell when the
    /// message was actually written.
    pub fn to_outgoing(&self, author_id: &str) -> OutgoingMessage {
        OutgoingMessage {
            client_id: Some(self.local_id.clone()),
            author_id: author_id.to_string(),
            author_name: self.author_name.clone(),
            author_avatar: self.author_avatar.clone(),
            body: self.body.clone(),
            composed_at: self.enqueued_at,
        }
    }
}

// ---------------------------------------------------------------------------
// OutgoingMessage
// ---------------------------------------------------------------------------

/// A record submitted to the remote log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<LocalId>,
    pub author_id: String,
    pub author_name: String,
    pub author_avatar: String,
    pub body: String,
    pub composed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Remote log records
// ---------------------------------------------------------------------------

/// A record as stored by the remote log: the submitted message plus the
/// server-assigned id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub message: OutgoingMessage,
}

impl LogRecord {
    pub fn into_message(self) -> Message {
        Message::acknowledged(self.id, self.created_at, self.message)
    }
}

/// Server response to a successful append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppendReceipt {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
}

/// Trim and check a message body before it is sent or queued.
pub fn validate_body(body: &str) -> Result<String, SyncError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(SyncError::EmptyBody);
    }
    if trimmed.len() > MAX_MESSAGE_BYTES {
        return Err(SyncError::BodyTooLarge {
            size: trimmed.len(),
            max: MAX_MESSAGE_BYTES,
        });
    }
    Ok(trimmed.to_string())
}
