use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::constants::LOCAL_ID_PREFIX;

/// Identifier assigned by the remote log once a message is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier generated on the device for a message that has not been
/// acknowledged yet.
///
/// The format is `pending-<unix nanos>-<16 hex chars>`: the clock part keeps
/// ids roughly monotonic, the random suffix keeps them unique when two ids
/// are generated within the same clock tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct LocalId(pub String);

impl LocalId {
    pub fn generate() -> Self {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let suffix: [u8; 8] = rand::random();
        Self(format!("{LOCAL_ID_PREFIX}{nanos}-{}", hex::encode(suffix)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of network link reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    None,
    #[default]
    Unknown,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Wifi => "wifi",
            ConnectionType::Cellular => "cellular",
            ConnectionType::None => "none",
            ConnectionType::Unknown => "unknown",
        }
    }
}
