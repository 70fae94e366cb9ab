//! Durable queue of outgoing messages that the remote log has not
//! acknowledged yet.
//!
//! Every mutation rewrites the whole queue to the key-value store before it
//! returns. If the write fails the in-memory change is undone, so the
//! persisted value is always the sole source of truth on restart.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, warn};

use cadence_shared::{LocalId, PendingEntry, SyncError};

use crate::error::Result;
use crate::kv::KeyValueStore;

/// Outcome of restoring the queue from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadReport {
    /// Number of entries restored.
    pub restored: usize,
    /// The persisted value could not be parsed and was discarded.
    pub corrupt: bool,
}

impl LoadReport {
    /// The loss to surface to the user, if any.
    pub fn error(&self) -> Option<SyncError> {
        self.corrupt.then(|| {
            SyncError::LocalStoreCorrupt("pending queue was unreadable and has been reset".into())
        })
    }
}

/// FIFO queue of [`PendingEntry`] persisted under a single key.
pub struct PendingQueue {
    store: Box<dyn KeyValueStore>,
    key: String,
    entries: VecDeque<PendingEntry>,
}

impl PendingQueue {
    /// Open the queue stored under `key`, restoring any entries left over
    /// from a previous session.
    pub fn open(store: Box<dyn KeyValueStore>, key: impl Into<String>) -> Result<(Self, LoadReport)> {
        let mut queue = Self {
            store,
            key: key.into(),
            entries: VecDeque::new(),
        };
        let report = queue.load_from_disk()?;
        Ok((queue, report))
    }

    /// Replace the in-memory queue with the persisted one.
    ///
    /// Unparseable data is treated as an empty queue and reported through
    /// [`LoadReport::corrupt`]; it is not overwritten until the next
    /// mutation.
    pub fn load_from_disk(&mut self) -> Result<LoadReport> {
        let raw = self.store.get(&self.key)?;

        let (entries, corrupt) = match raw {
            None => (VecDeque::new(), false),
            Some(json) => match serde_json::from_str::<Vec<PendingEntry>>(&json) {
                Ok(list) => (dedup_by_id(list), false),
                Err(e) => {
                    warn!(
                        key = %self.key,
                        error = %e,
                        "pending queue is unreadable, unsent messages may have been lost"
                    );
                    (VecDeque::new(), true)
                }
            },
        };

        self.entries = entries;

        if !self.entries.is_empty() {
            info!(restored = self.entries.len(), "restored pending messages");
        }

        Ok(LoadReport {
            restored: self.entries.len(),
            corrupt,
        })
    }

    /// Queue a new message with a freshly generated local id.
    pub fn enqueue(
        &mut self,
        body: impl Into<String>,
        author_name: impl Into<String>,
        author_avatar: impl Into<String>,
    ) -> Result<PendingEntry> {
        let entry = PendingEntry::new(body.into(), author_name.into(), author_avatar.into());
        self.enqueue_entry(entry.clone())?;
        Ok(entry)
    }

    /// Queue an entry built elsewhere (typically a direct send that failed).
    ///
    /// An entry whose id is already queued is ignored.
    pub fn enqueue_entry(&mut self, entry: PendingEntry) -> Result<()> {
        if self.contains(&entry.local_id) {
            debug!(local_id = %entry.local_id, "entry already queued");
            return Ok(());
        }

        let local_id = entry.local_id.clone();
        self.entries.push_back(entry);
        if let Err(e) = self.persist() {
            self.entries.pop_back();
            return Err(e);
        }

        debug!(local_id = %local_id, pending = self.entries.len(), "message queued");
        Ok(())
    }

    /// Remove an entry after the remote log acknowledged it.
    ///
    /// Returns `false` when no entry has that id.
    pub fn remove(&mut self, local_id: &LocalId) -> Result<bool> {
        let Some(pos) = self.entries.iter().position(|e| &e.local_id == local_id) else {
            return Ok(false);
        };

        let removed = self.entries.remove(pos);
        if let Err(e) = self.persist() {
            if let Some(entry) = removed {
                self.entries.insert(pos, entry);
            }
            return Err(e);
        }

        debug!(local_id = %local_id, pending = self.entries.len(), "pending message removed");
        Ok(true)
    }

    /// Drop every entry whose id appears in `acknowledged`, persisting once.
    ///
    /// Returns the ids that were removed.
    pub fn retain_unacknowledged(&mut self, acknowledged: &HashSet<LocalId>) -> Result<Vec<LocalId>> {
        if !self.entries.iter().any(|e| acknowledged.contains(&e.local_id)) {
            return Ok(Vec::new());
        }

        let previous = self.entries.clone();
        let mut removed = Vec::new();
        self.entries.retain(|e| {
            let acked = acknowledged.contains(&e.local_id);
            if acked {
                removed.push(e.local_id.clone());
            }
            !acked
        });

        if let Err(e) = self.persist() {
            self.entries = previous;
            return Err(e);
        }

        debug!(removed = removed.len(), pending = self.entries.len(), "reconciled pending messages");
        Ok(removed)
    }

    /// Entries in enqueue order, without removing them.
    pub fn drain_oldest_first(&self) -> Vec<PendingEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Oldest queued entry.
    pub fn front(&self) -> Option<&PendingEntry> {
        self.entries.front()
    }

    pub fn entries(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.iter()
    }

    pub fn contains(&self, local_id: &LocalId) -> bool {
        self.entries.iter().any(|e| &e.local_id == local_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_string(&self.entries)?;
        self.store.set(&self.key, &json)
    }
}

fn dedup_by_id(list: Vec<PendingEntry>) -> VecDeque<PendingEntry> {
    let mut seen = HashSet::new();
    list.into_iter()
        .filter(|e| seen.insert(e.local_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::kv::MemoryStore;

    const KEY: &str = "pending_chat_messages";

    fn open(store: &MemoryStore) -> PendingQueue {
        PendingQueue::open(Box::new(store.clone()), KEY).unwrap().0
    }

    #[test]
    fn test_enqueue_is_fifo() {
        let store = MemoryStore::new();
        let mut queue = open(&store);

        let a = queue.enqueue("a", "Ada", "a.png").unwrap();
        let b = queue.enqueue("b", "Ada", "a.png").unwrap();

        let drained = queue.drain_oldest_first();
        assert_eq!(drained, vec![a.clone(), b]);
        // draining does not remove anything
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front(), Some(&a));
    }

    #[test]
    fn test_every_mutation_is_persisted() {
        let store = MemoryStore::new();
        let mut queue = open(&store);

        let a = queue.enqueue("a", "Ada", "a.png").unwrap();
        queue.enqueue("b", "Ada", "a.png").unwrap();
        assert_eq!(open(&store).len(), 2);

        assert!(queue.remove(&a.local_id).unwrap());
        let restarted = open(&store);
        assert_eq!(restarted.len(), 1);
        assert_eq!(restarted.front().unwrap().body, "b");
    }

    #[test]
    fn test_remove_unknown_id() {
        let store = MemoryStore::new();
        let mut queue = open(&store);
        queue.enqueue("a", "Ada", "a.png").unwrap();
        assert!(!queue.remove(&LocalId("pending-0-0".into())).unwrap());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_load_twice_is_identical() {
        let store = MemoryStore::new();
        let mut queue = open(&store);
        queue.enqueue("a", "Ada", "a.png").unwrap();
        queue.enqueue("b", "Ada", "a.png").unwrap();

        let first = open(&store).drain_oldest_first();
        let second = open(&store).drain_oldest_first();
        assert_eq!(first, second);

        queue.load_from_disk().unwrap();
        assert_eq!(queue.drain_oldest_first(), first);
    }

    #[test]
    fn test_failed_persist_rolls_back() {
        let store = MemoryStore::new();
        let mut queue = open(&store);
        let kept = queue.enqueue("kept", "Ada", "a.png").unwrap();

        store.set_fail_writes(true);
        assert!(queue.enqueue("lost", "Ada", "a.png").is_err());
        assert!(queue.remove(&kept.local_id).is_err());
        assert_eq!(queue.drain_oldest_first(), vec![kept.clone()]);

        // Only the entry whose write failed is missing after a restart.
        store.set_fail_writes(false);
        assert_eq!(open(&store).drain_oldest_first(), vec![kept]);
    }

    #[test]
    fn test_corrupt_store_loads_empty() {
        let store = MemoryStore::new();
        store.put_raw(KEY, "{not json");

        let (mut queue, report) = PendingQueue::open(Box::new(store.clone()), KEY).unwrap();
        assert!(report.corrupt);
        assert!(matches!(report.error(), Some(SyncError::LocalStoreCorrupt(_))));
        assert_eq!(report.restored, 0);
        assert!(queue.is_empty());

        queue.enqueue("fresh", "Ada", "a.png").unwrap();
        let (_, report) = PendingQueue::open(Box::new(store), KEY).unwrap();
        assert!(report.error().is_none());
        assert_eq!(report.restored, 1);
    }

    #[test]
    fn test_enqueue_entry_ignores_duplicates() {
        let store = MemoryStore::new();
        let mut queue = open(&store);
        let entry = PendingEntry::new("x".into(), "Ada".into(), "a.png".into());

        queue.enqueue_entry(entry.clone()).unwrap();
        queue.enqueue_entry(entry).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_retain_unacknowledged() {
        let store = MemoryStore::new();
        let mut queue = open(&store);
        let a = queue.enqueue("a", "Ada", "a.png").unwrap();
        let b = queue.enqueue("b", "Ada", "a.png").unwrap();
        let c = queue.enqueue("c", "Ada", "a.png").unwrap();

        let acked: HashSet<LocalId> = [a.local_id.clone(), c.local_id.clone()].into();
        let removed = queue.retain_unacknowledged(&acked).unwrap();

        assert_eq!(removed, vec![a.local_id, c.local_id]);
        assert_eq!(open(&store).drain_oldest_first(), vec![b]);
    }

    #[test]
    fn test_queue_on_sqlite_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let entry = {
            let db = Database::open_at(&path).unwrap();
            let (mut queue, _) = PendingQueue::open(Box::new(db), KEY).unwrap();
            queue.enqueue("offline hello", "Ada", "a.png").unwrap()
        };

        let db = Database::open_at(&path).unwrap();
        let (queue, report) = PendingQueue::open(Box::new(db), KEY).unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(queue.front(), Some(&entry));
    }
}
