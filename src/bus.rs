//! In-process pub/sub over named broadcast channels.
//!
//! Notification-only: nothing in the approval lifecycle depends on delivery.
//! Waiters poll the durable record; these channels exist so a UI or gateway
//! can push instead of poll.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

/// Channel carrying approval-created notifications.
pub const APPROVALS_CHANNEL: &str = "approvals:pending";

/// Channel carrying operator alerts as `{"text": ...}` JSON.
pub const NOTIFICATIONS_CHANNEL: &str = "notifications:agent";

const CHANNEL_CAPACITY: usize = 64;

pub struct Bus {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Publish a payload. Best-effort: returns the number of receivers that
    /// got the message; zero subscribers is not an error.
    pub fn publish(&self, channel: &str, payload: &str) -> usize {
        let sender = self.sender(channel);
        sender.send(payload.to_string()).unwrap_or(0)
    }

    /// Subscribe to a channel. Messages published before the subscription are
    /// not replayed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.sender(channel).subscribe()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
