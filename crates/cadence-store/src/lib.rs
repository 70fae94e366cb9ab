//! # cadence-store
//!
//! Local durable storage for the Cadence chat core.
//!
//! The crate exposes a synchronous [`KeyValueStore`] boundary with two
//! implementations (SQLite-backed [`Database`] and the in-process
//! [`MemoryStore`]) and the [`PendingQueue`] that keeps not-yet-acknowledged
//! outgoing messages on top of it.

pub mod database;
pub mod kv;
pub mod migrations;
pub mod pending;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use kv::{KeyValueStore, MemoryStore};
pub use pending::{LoadReport, PendingQueue};
