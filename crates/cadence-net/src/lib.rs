// Network-facing side of the chat core: connectivity tracking and the
// remote append-only message log.

pub mod connectivity;
pub mod http_log;
pub mod memory_log;
pub mod remote;
pub mod signal;

pub use connectivity::{ConnectivityMonitor, ConnectivityState, NetworkPlatform, NetworkStatus, PlatformError};
pub use http_log::HttpLog;
pub use memory_log::{AppendMode, MemoryLog};
pub use remote::{RemoteError, RemoteLog, SnapshotResult, SnapshotStream};
pub use signal::{OnlineSignal, SignalEvent};
