//! In-memory append-only record log, one per collection.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use cadence_shared::{LocalId, LogRecord, MessageId, OutgoingMessage};

#[derive(Debug, Default)]
struct Collection {
    records: Vec<LogRecord>,
    by_client_id: HashMap<LocalId, usize>,
}

#[derive(Debug, Default)]
pub struct RecordLog {
    collections: RwLock<HashMap<String, Collection>>,
}

/// Outcome of [`RecordLog::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub record: LogRecord,
    /// `false` when the client id was already in the log.
    pub created: bool,
}

impl RecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` to `collection`, or return the record already
    /// holding its client id.
    ///
    /// Timestamps within a collection strictly increase.
    pub async fn append(&self, collection: &str, message: OutgoingMessage) -> Appended {
        let mut collections = self.collections.write().await;
        let col = collections.entry(collection.to_string()).or_default();

        if let Some(&idx) = message.client_id.as_ref().and_then(|c| col.by_client_id.get(c)) {
            debug!(collection, id = %col.records[idx].id, "duplicate append, returning existing record");
            return Appended {
                record: col.records[idx].clone(),
                created: false,
            };
        }

        let record = LogRecord {
            id: MessageId(Uuid::new_v4().simple().to_string()),
            created_at: next_timestamp(col.records.last().map(|r| r.created_at)),
            message,
        };

        if let Some(client_id) = &record.message.client_id {
            col.by_client_id.insert(client_id.clone(), col.records.len());
        }
        col.records.push(record.clone());

        Appended {
            record,
            created: true,
        }
    }

    /// Every record of `collection` in server order.
    pub async fn list(&self, collection: &str) -> Vec<LogRecord> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.records.clone())
            .unwrap_or_default()
    }
}

fn next_timestamp(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match last {
        Some(last) if last >= now => last + Duration::microseconds(1),
        _ => now,
    }
}
