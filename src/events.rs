//! In-process publish/subscribe for engine state transitions.
//!
//! External collaborators (the UI layer) subscribe for receivers; the
//! engine publishes on every observable transition. The channel is
//! bounded and replaced wholesale on reset so no subscriber survives a
//! logout.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WalletEvent {
    AccountCreated { address: String },
    AccountUpdated { address: String },
    AccountDeleted { address: String },
    NetworkSwitched { key: String, version: u64 },
    NetworkRegistered { key: String },
    SessionConnected { origin: String, topic: String },
    SessionDisconnected { origin: String },
    PermissionRequested { id: String, origin: String, scope: String },
    PermissionGranted { origin: String, scope: String },
    ChainChanged { chain_id: u64 },
    AccountsChanged { addresses: Vec<String> },
    TransactionSubmitted { hash: String, from: String },
    TransactionConfirmed { hash: String },
    TransactionFailed { hash: String, reason: String },
    GasEstimationFailed { reason: String },
    BackupCreated { created_at: i64 },
}

pub struct EventBus {
    sender: RwLock<broadcast::Sender<WalletEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sender: RwLock::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.sender.read().expect("event bus lock poisoned").subscribe()
    }

    /// Publish to all current subscribers. A send with no receivers is
    /// not an error; state transitions happen whether or not anyone is
    /// listening.
    pub fn publish(&self, event: WalletEvent) {
        let sender = self.sender.read().expect("event bus lock poisoned");
        if let Err(e) = sender.send(event) {
            log::trace!("event dropped, no subscribers: {:?}", e.0);
        }
    }

    /// Replace the channel, detaching every existing subscriber.
    pub fn reset(&self) {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        *self.sender.write().expect("event bus lock poisoned") = sender;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(WalletEvent::ChainChanged { chain_id: 1 });
        assert_eq!(rx.recv().await.unwrap(), WalletEvent::ChainChanged { chain_id: 1 });
    }

    #[tokio::test]
    async fn reset_detaches_old_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.reset();
        bus.publish(WalletEvent::ChainChanged { chain_id: 5 });
        // The pre-reset receiver sees a closed channel, never the event.
        assert!(rx.recv().await.is_err());
    }
}
