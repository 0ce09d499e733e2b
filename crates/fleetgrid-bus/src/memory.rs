//! In-process bus: one tokio broadcast channel per subject.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::BusResult;
use crate::transport::{BusFuture, BusMessage, Subscription, Transport};

/// Messages buffered per subscriber before it starts lagging.
const DEFAULT_CAPACITY: usize = 1024;

/// Subject-addressed broadcast bus living inside the process.
///
/// Every subscriber of a subject receives every message published to it
/// after it subscribed. There is no persistence and no wildcard matching.
/// A subject only keeps a channel while someone is subscribed to it.
pub struct InMemoryBus {
    channels: DashMap<String, broadcast::Sender<BusMessage>>,
    capacity: usize,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Number of subjects currently holding a channel.
    pub fn subject_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of live subscribers on a subject.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.channels
            .get(subject)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InMemoryBus {
    fn publish(&self, subject: &str, payload: Vec<u8>) -> BusFuture<'_, ()> {
        let msg = BusMessage {
            subject: subject.to_string(),
            payload,
        };
        // A send error only means nobody is subscribed right now.
        let delivered = self
            .channels
            .get(subject)
            .map(|tx| tx.send(msg).unwrap_or(0))
            .unwrap_or(0);
        if delivered == 0 {
            // Subscribe holds the entry lock while attaching, so this never
            // drops a channel someone is joining.
            self.channels.remove_if(subject, |_, tx| tx.receiver_count() == 0);
        }
        trace!(%subject, delivered, "bus publish");
        Box::pin(async { Ok(()) })
    }

    fn subscribe(&self, subject: &str) -> BusResult<Subscription> {
        let rx = self
            .channels
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Ok(Subscription::new(subject, rx))
    }
}
