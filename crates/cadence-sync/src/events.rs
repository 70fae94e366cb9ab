use serde::Serialize;

use cadence_shared::{ConnectionType, LocalId};

use crate::engine::SyncState;

pub const EVENT_SYNC_STATE_CHANGED: &str = "sync-state-changed";
pub const EVENT_MESSAGE_DROPPED: &str = "message-dropped";
pub const EVENT_DRAIN_FINISHED: &str = "drain-finished";
pub const EVENT_STORE_CORRUPT: &str = "store-corrupt";
pub const EVENT_SUBSCRIPTION_LOST: &str = "subscription-lost";

/// What the presentation layer shows next to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub is_online: bool,
    pub connection_type: ConnectionType,
    pub pending_count: usize,
    /// A drain is in progress.
    pub is_syncing: bool,
    /// A remote subscription is open.
    pub subscribed: bool,
    /// Unsent messages may have been lost when the queue was restored.
    pub store_corrupt: bool,
}

/// One-off engine events, delivered over a broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SyncNotification {
    #[serde(rename_all = "camelCase")]
    StateChanged { from: SyncState, to: SyncState },

    /// A queued message was refused by the remote log and will not be retried.
    #[serde(rename_all = "camelCase")]
    MessageDropped { local_id: LocalId, reason: String },

    DrainFinished { sent: usize, remaining: usize },

    /// The persisted queue was unreadable and started empty.
    StoreCorrupt,

    /// The remote subscription failed; it is reopened on the next reconnect.
    SubscriptionLost { reason: String },
}

impl SyncNotification {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => EVENT_SYNC_STATE_CHANGED,
            Self::MessageDropped { .. } => EVENT_MESSAGE_DROPPED,
            Self::DrainFinished { .. } => EVENT_DRAIN_FINISHED,
            Self::StoreCorrupt => EVENT_STORE_CORRUPT,
            Self::SubscriptionLost { .. } => EVENT_SUBSCRIPTION_LOST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_json_shape() {
        let status = SyncStatus {
            state: SyncState::Offline,
            is_online: false,
            connection_type: ConnectionType::None,
            pending_count: 2,
            is_syncing: false,
            subscribed: false,
            store_corrupt: false,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["isOnline"], false);
        assert_eq!(json["pendingCount"], 2);
        assert_eq!(json["connectionType"], "none");
        assert_eq!(json["state"], "offline");
    }

    #[test]
    fn test_notification_json_shape() {
        let n = SyncNotification::MessageDropped {
            local_id: LocalId("pending-1-ab".into()),
            reason: "too large".into(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["kind"], "messageDropped");
        assert_eq!(json["localId"], "pending-1-ab");
        assert_eq!(n.event_name(), EVENT_MESSAGE_DROPPED);
    }
}
