//! Application events
//!
//! Broadcast notifications consumed by the sync layer and the UI.

use crate::config::EVENT_CHANNEL_CAPACITY;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppEvent {
    /// Local sync bookkeeping changed; entries must be re-uploaded
    SyncStateChanged,
    /// An import finished; the sync layer should reconcile local state
    ResyncRequested,
    /// A subscription validation removed ads
    AdsRemoved,
}

/// Broadcast sender shared by every service
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Deliver an event. Having no subscribers is fine.
    pub fn emit(&self, event: AppEvent) {
        match self.sender.send(event) {
            Ok(receivers) => tracing::debug!("Emitted {:?} to {} receivers", event, receivers),
            Err(_) => tracing::debug!("Emitted {:?} with no receivers", event),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
