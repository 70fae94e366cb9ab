//! In-process online/offline event pair.
//!
//! This is the fallback connectivity source used when the platform network
//! API is missing or broken. The host toggles it from whatever generic
//! online/offline notification it has; redundant events are allowed and are
//! filtered by the monitor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Online,
    Offline,
}

impl SignalEvent {
    pub fn is_online(self) -> bool {
        matches!(self, SignalEvent::Online)
    }
}

/// Shared online flag plus a broadcast of every toggle.
#[derive(Debug, Clone)]
pub struct OnlineSignal {
    online: Arc<AtomicBool>,
    events: broadcast::Sender<SignalEvent>,
}

impl OnlineSignal {
    pub fn new(initially_online: bool) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            online: Arc::new(AtomicBool::new(initially_online)),
            events,
        }
    }

    pub fn set_online(&self) {
        self.set(SignalEvent::Online);
    }

    pub fn set_offline(&self) {
        self.set(SignalEvent::Offline);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Receive every subsequent toggle.
    pub fn events(&self) -> broadcast::Receiver<SignalEvent> {
        self.events.subscribe()
    }

    fn set(&self, event: SignalEvent) {
        self.online.store(event.is_online(), Ordering::SeqCst);
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(event);
    }
}

impl Default for OnlineSignal {
    fn default() -> Self {
        Self::new(true)
    }
}
