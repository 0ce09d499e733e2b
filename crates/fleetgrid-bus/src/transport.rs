//! Publish/subscribe transport abstraction.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::{BusError, BusResult};

/// Boxed future returned by [`Transport::publish`].
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = BusResult<T>> + Send + 'a>>;

/// One message as carried by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Decode the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> BusResult<T> {
        serde_json::from_slice(&self.payload).map_err(|e| BusError::Decode {
            subject: self.subject.clone(),
            reason: e.to_string(),
        })
    }
}

/// A publish/subscribe channel between robots and this service.
pub trait Transport: Send + Sync {
    /// Publish raw bytes to a subject. Publishing to a subject nobody
    /// listens on is not an error.
    fn publish(&self, subject: &str, payload: Vec<u8>) -> BusFuture<'_, ()>;

    /// Subscribe to every message published to `subject` from now on.
    fn subscribe(&self, subject: &str) -> BusResult<Subscription>;
}

/// Receiving end of a subscription.
pub struct Subscription {
    subject: String,
    rx: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    pub fn new(subject: impl Into<String>, rx: broadcast::Receiver<BusMessage>) -> Self {
        Self {
            subject: subject.into(),
            rx,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, or `None` once the transport is gone.
    ///
    /// A slow subscriber that falls behind skips the dropped messages.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(subject = %self.subject, skipped, "subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Serialize `value` as JSON and publish it, bounded by `timeout`.
pub async fn publish_json<T: Serialize + ?Sized>(
    transport: &dyn Transport,
    subject: &str,
    value: &T,
    timeout: Duration,
) -> BusResult<()> {
    let payload = serde_json::to_vec(value).map_err(|e| BusError::Encode {
        subject: subject.to_string(),
        reason: e.to_string(),
    })?;
    match tokio::time::timeout(timeout, transport.publish(subject, payload)).await {
        Ok(result) => result,
        Err(_) => Err(BusError::Timeout {
            subject: subject.to_string(),
            after: timeout,
        }),
    }
}
