use thiserror::Error;

/// Errors surfaced by the chat sync core.
///
/// Only a few of these ever reach the presentation layer: transient remote
/// failures are converted into queued sends, and a corrupt local store is
/// reported as an informational notice rather than an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Transport failure, timeout or server error. Always retryable.
    #[error("Remote log unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote log refused this payload. Retrying will not help.
    #[error("Remote log rejected message: {0}")]
    RemoteRejected(String),

    /// The persisted pending queue could not be parsed.
    #[error("Local store corrupt: {0}")]
    LocalStoreCorrupt(String),

    #[error("Message body is empty")]
    EmptyBody,

    #[error("Message body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// Reading or writing the local durable store failed.
    #[error("Local store error: {0}")]
    Store(String),

    /// The sync engine task is no longer running.
    #[error("Sync engine stopped")]
    EngineStopped,
}

impl SyncError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::RemoteUnavailable(_))
    }
}
