/// Application name
pub const APP_NAME: &str = "Cadence";

/// Remote collection holding the group chat log
pub const CHAT_COLLECTION: &str = "chat_messages";

/// Key under which the pending queue is persisted in the local store
pub const PENDING_STORE_KEY: &str = "pending_chat_messages";

/// Prefix of locally generated message identifiers
pub const LOCAL_ID_PREFIX: &str = "pending-";

/// Maximum message body size in bytes (16 KiB)
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024;

/// Default upper bound on a single remote append, in seconds
pub const DEFAULT_APPEND_TIMEOUT_SECS: u64 = 12;

/// Default interval between snapshot polls, in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Display name used when the account has neither a name nor an e-mail
pub const ANONYMOUS_NAME: &str = "Anonymous";

/// Generated avatar service used when no photo is available
pub const AVATAR_SERVICE_URL: &str = "https://ui-avatars.com/api/";

/// Pixel size requested from the avatar service
pub const AVATAR_SIZE: u32 = 200;
