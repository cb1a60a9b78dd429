use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::ChangeEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for audit/notification consumers, keyed by event id.
/// Sends are fire-and-forget after a successful commit: a missing or slow
/// subscriber never affects the state transition that produced the change.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<ChangeEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to all state transitions for one event. Creates the channel
    /// if needed.
    pub fn subscribe(&self, event_id: Ulid) -> broadcast::Receiver<ChangeEvent> {
        let sender = self
            .channels
            .entry(event_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, change: &ChangeEvent) {
        if let Some(sender) = self.channels.get(&change.event_id()) {
            let _ = sender.send(change.clone());
        }
    }

    pub fn remove(&self, event_id: &Ulid) {
        self.channels.remove(event_id);
    }
}
