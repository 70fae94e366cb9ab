//! Merged view of the remote log and the local pending queue.

use std::collections::HashSet;

use cadence_shared::{LocalId, Message, PendingEntry};

/// Build the feed shown to the user.
///
/// The remote snapshot comes first, in server order, followed by the
/// pending entries in enqueue order, flagged `pending`. Pending messages
/// always sit after every synced one because their real position is only
/// known once the remote log acknowledges them.
///
/// A logical message is shown once: a pending entry whose local id already
/// appears in the snapshot is skipped, and a snapshot record repeating a
/// `client_id` seen earlier (an append retried after a lost acknowledgment)
/// is collapsed into the first one.
pub fn merge_feed<'a>(
    snapshot: &[Message],
    pending: impl IntoIterator<Item = &'a PendingEntry>,
    author_id: &str,
) -> Vec<Message> {
    let mut seen: HashSet<&LocalId> = HashSet::new();
    let mut feed = Vec::with_capacity(snapshot.len());

    for msg in snapshot {
        if let Some(client_id) = &msg.client_id {
            if !seen.insert(client_id) {
                continue;
            }
        }
        feed.push(msg.clone());
    }

    for entry in pending {
        if seen.contains(&entry.local_id) {
            continue;
        }
        feed.push(Message::from_pending(entry, author_id));
    }

    feed
}

/// Local ids the remote log has acknowledged, as seen in `snapshot`.
pub fn acknowledged_ids(snapshot: &[Message]) -> HashSet<LocalId> {
    snapshot.iter().filter_map(|m| m.client_id.clone()).collect()
}
