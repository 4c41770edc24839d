use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-villa broadcast of applied calendar changes, for calendar views and
/// channel-manager sync.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a villa's calendar. Creates the channel if needed.
    pub fn subscribe(&self, villa_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(villa_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, villa_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&villa_id)
            && sender.send(event.clone()).is_err()
        {
            drop(sender);
            // Every receiver is gone.
            self.channels.remove_if(&villa_id, |_, s| s.receiver_count() == 0);
        }
    }

    pub fn subscriber_count(&self, villa_id: Ulid) -> usize {
        self.channels
            .get(&villa_id)
            .map_or(0, |s| s.receiver_count())
    }
}
