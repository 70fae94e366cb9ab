use thiserror::Error;

use cadence_shared::SyncError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The platform reported no data directory for the app.
    #[error("no application data directory on this platform")]
    NoDataDir,

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema migration failed: {0}")]
    Migration(String),

    /// The pending queue could not be encoded.
    #[error("queue encoding: {0}")]
    Json(#[from] serde_json::Error),

    /// The backing store refused a write.
    #[error("write refused: {0}")]
    WriteFailed(String),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
