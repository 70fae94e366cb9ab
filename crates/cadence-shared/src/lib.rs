//! Types shared by every Cadence crate: the chat data model, identifiers,
//! the sync error taxonomy and protocol constants.

pub mod constants;
pub mod error;
pub mod message;
pub mod types;

pub use error::SyncError;
pub use message::{validate_body, AppendReceipt, Author, LogRecord, Message, OutgoingMessage, PendingEntry};
pub use types::{ConnectionType, LocalId, MessageId};
