use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-professional calendar notifications. Confirmation
/// and cancellation messages to clients hang off these channels.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self { channels: DashMap::new() }
    }

    /// Subscribe to events for a professional's calendar. Creates the
    /// channel if needed.
    pub fn subscribe(&self, professional_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(professional_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, professional_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&professional_id) {
            let _ = sender.send(event.clone());
        }
    }
}
