//! Connectivity tracking.
//!
//! The monitor merges two independent signals into one online flag: the
//! platform network-status API (when present) and the in-process
//! [`OnlineSignal`] fallback. Identical transitions are dropped, so
//! subscribers are woken only when the online flag actually flips. The
//! monitor never contacts the remote service itself.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use cadence_shared::ConnectionType;

use crate::signal::{OnlineSignal, SignalEvent};

/// Status as reported by the platform network API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatus {
    pub connected: bool,
    pub connection_type: ConnectionType,
}

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Network status API not available on this platform")]
    Unavailable,

    #[error("Network status query failed: {0}")]
    Query(String),
}

/// Platform network-status query/subscribe pair.
#[async_trait]
pub trait NetworkPlatform: Send + Sync {
    /// Current status.
    async fn status(&self) -> Result<NetworkStatus, PlatformError>;

    /// Stream of status changes, if the platform can push them.
    fn changes(&self) -> Option<BoxStream<'static, NetworkStatus>>;
}

/// Process-wide connectivity as seen by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub online: bool,
    pub connection_type: ConnectionType,
}

/// Owns the connectivity state and the tasks feeding it.
pub struct ConnectivityMonitor {
    state_tx: Arc<watch::Sender<ConnectivityState>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectivityMonitor {
    /// Query the initial state and start listening to both signals.
    ///
    /// If there is no platform API, or its query fails, the fallback
    /// signal's current value is used. Platform failures are never surfaced.
    pub async fn start(platform: Option<Arc<dyn NetworkPlatform>>, fallback: OnlineSignal) -> Self {
        // Subscribe first so a toggle racing with the platform query is not lost.
        let fallback_events = fallback.events();

        let initial = match &platform {
            Some(p) => match p.status().await {
                Ok(status) => ConnectivityState {
                    online: status.connected,
                    connection_type: status.connection_type,
                },
                Err(e) => {
                    debug!(error = %e, "platform network query failed, using fallback signal");
                    fallback_state(&fallback)
                }
            },
            None => fallback_state(&fallback),
        };

        info!(
            online = initial.online,
            connection_type = initial.connection_type.as_str(),
            "connectivity monitor started"
        );

        let (state_tx, _) = watch::channel(initial);
        let state_tx = Arc::new(state_tx);
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(fallback_loop(
            state_tx.clone(),
            fallback,
            fallback_events,
        )));

        if let Some(changes) = platform.as_ref().and_then(|p| p.changes()) {
            tasks.push(tokio::spawn(platform_loop(state_tx.clone(), changes)));
        }

        Self { state_tx, tasks }
    }

    pub fn is_online(&self) -> bool {
        self.state_tx.borrow().online
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    /// Receiver that is notified on every online/offline flip.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn fallback_state(fallback: &OnlineSignal) -> ConnectivityState {
    ConnectivityState {
        online: fallback.is_online(),
        connection_type: ConnectionType::Unknown,
    }
}

async fn fallback_loop(
    state_tx: Arc<watch::Sender<ConnectivityState>>,
    fallback: OnlineSignal,
    mut events: broadcast::Receiver<SignalEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                apply(&state_tx, event.is_online(), None);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "fallback signal lagged, resyncing");
                apply(&state_tx, fallback.is_online(), None);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn platform_loop(
    state_tx: Arc<watch::Sender<ConnectivityState>>,
    mut changes: BoxStream<'static, NetworkStatus>,
) {
    while let Some(status) = changes.next().await {
        apply(&state_tx, status.connected, Some(status.connection_type));
    }
    debug!("platform network change stream ended");
}

/// Fold one observation into the state. Returns whether subscribers were
/// notified.
fn apply(
    state_tx: &watch::Sender<ConnectivityState>,
    online: bool,
    connection_type: Option<ConnectionType>,
) -> bool {
    state_tx.send_if_modified(|state| {
        if let Some(ct) = connection_type {
            state.connection_type = ct;
        }
        if state.online == online {
            return false;
        }
        state.online = online;
        info!(online, "connectivity changed");
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::channel::mpsc;

    struct FakePlatform {
        status: Result<NetworkStatus, ()>,
        changes: Mutex<Option<mpsc::UnboundedReceiver<NetworkStatus>>>,
    }

    #[async_trait]
    impl NetworkPlatform for FakePlatform {
        async fn status(&self) -> Result<NetworkStatus, PlatformError> {
            self.status
                .map_err(|_| PlatformError::Query("plugin not loaded".into()))
        }

        fn changes(&self) -> Option<BoxStream<'static, NetworkStatus>> {
            let rx = self.changes.lock().unwrap().take()?;
            Some(rx.boxed())
        }
    }

    fn platform(
        status: Result<NetworkStatus, ()>,
    ) -> (Arc<dyn NetworkPlatform>, mpsc::UnboundedSender<NetworkStatus>) {
        let (tx, rx) = mpsc::unbounded();
        let p = FakePlatform {
            status,
            changes: Mutex::new(Some(rx)),
        };
        (Arc::new(p), tx)
    }

    fn wifi(connected: bool) -> NetworkStatus {
        NetworkStatus {
            connected,
            connection_type: if connected {
                ConnectionType::Wifi
            } else {
                ConnectionType::None
            },
        }
    }

    #[tokio::test]
    async fn test_initial_state_from_platform() {
        let (p, _tx) = platform(Ok(wifi(false)));
        let monitor = ConnectivityMonitor::start(Some(p), OnlineSignal::new(true)).await;

        assert!(!monitor.is_online());
        assert_eq!(monitor.state().connection_type, ConnectionType::None);
    }

    #[tokio::test]
    async fn test_platform_failure_uses_fallback() {
        let (p, _tx) = platform(Err(()));
        let monitor = ConnectivityMonitor::start(Some(p), OnlineSignal::new(false)).await;

        assert!(!monitor.is_online());
        assert_eq!(monitor.state().connection_type, ConnectionType::Unknown);
    }

    #[tokio::test]
    async fn test_no_platform_uses_fallback() {
        let monitor = ConnectivityMonitor::start(None, OnlineSignal::new(true)).await;
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_redundant_transitions_are_ignored() {
        let signal = OnlineSignal::new(true);
        let monitor = ConnectivityMonitor::start(None, signal.clone()).await;
        let mut rx = monitor.subscribe();

        signal.set_online();
        signal.set_online();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!rx.has_changed().unwrap());

        signal.set_offline();
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().online);

        signal.set_offline();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_both_signals_feed_one_state() {
        let signal = OnlineSignal::new(true);
        let (p, platform_tx) = platform(Ok(wifi(true)));
        let monitor = ConnectivityMonitor::start(Some(p), signal.clone()).await;
        let mut rx = monitor.subscribe();

        platform_tx.unbounded_send(wifi(false)).unwrap();
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().online);

        signal.set_online();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().online);
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_connection_type_change_is_silent() {
        let (p, platform_tx) = platform(Ok(wifi(true)));
        let monitor = ConnectivityMonitor::start(Some(p), OnlineSignal::new(true)).await;
        let mut rx = monitor.subscribe();

        platform_tx
            .unbounded_send(NetworkStatus {
                connected: true,
                connection_type: ConnectionType::Cellular,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!rx.has_changed().unwrap());
        assert_eq!(monitor.state().connection_type, ConnectionType::Cellular);
    }
}
