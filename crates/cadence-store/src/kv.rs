//! Key-value persistence boundary.
//!
//! The pending queue only needs `get` and `set` on string keys. [`Database`]
//! provides the durable implementation; [`MemoryStore`] is a process-local one
//! whose clones share the same map, so tests can "restart" by building a new
//! queue over a clone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Synchronous string key-value store that survives process restarts.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Durably write `value`. Returns only once the write is committed.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: HashMap<String, String>,
    fail_writes: bool,
}

/// In-memory [`KeyValueStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail, simulating a full or read-only disk.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Overwrite a raw value, bypassing any write failure switch.
    pub fn put_raw(&self, key: &str, value: &str) {
        self.lock().values.insert(key.to_string(), value.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(StoreError::WriteFailed(format!("write to '{key}' refused")));
        }
        inner.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
