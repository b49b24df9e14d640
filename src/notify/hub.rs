use super::{Ack, NotificationChannel, NotificationEvent};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// In-process pub/sub keyed by consumer id.
///
/// Publishing to a consumer with no live receiver answers `acked: false`, which
/// the dispatcher treats as "not subscribed yet" and retries.
pub struct NotificationHub {
    channels: Mutex<HashMap<String, broadcast::Sender<NotificationEvent>>>,
    capacity: usize,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, consumer_id: &str) -> broadcast::Receiver<NotificationEvent> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(consumer_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, consumer_id: &str) -> usize {
        self.channels
            .lock()
            .unwrap()
            .get(consumer_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for NotificationHub {
    async fn publish(&self, consumer_id: &str, event: &NotificationEvent) -> Result<Ack> {
        let channels = self.channels.lock().unwrap();
        let acked = match channels.get(consumer_id) {
            Some(tx) => tx.send(event.clone()).is_ok(),
            None => false,
        };
        Ok(Ack { acked })
    }
}
