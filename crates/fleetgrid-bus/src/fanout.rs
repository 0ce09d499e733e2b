//! Best-effort realtime fan-out to observers (dashboards).
//!
//! Fan-out is a side channel: [`Fanout::notify`] never fails and never
//! blocks the caller. Delivery problems are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::transport::{Transport, publish_json};

/// A best-effort push channel.
pub trait Fanout: Send + Sync {
    fn notify(&self, channel: &str, payload: serde_json::Value);
}

/// Fan-out that publishes onto a [`Transport`] from a detached task.
pub struct BestEffortFanout {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl BestEffortFanout {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }
}

impl Fanout for BestEffortFanout {
    fn notify(&self, channel: &str, payload: serde_json::Value) {
        let transport = self.transport.clone();
        let channel = channel.to_string();
        let timeout = self.timeout;
        tokio::spawn(async move {
            match publish_json(transport.as_ref(), &channel, &payload, timeout).await {
                Ok(()) => debug!(%channel, "fan-out delivered"),
                Err(e) => warn!(%channel, error = %e, "fan-out failed, dropped"),
            }
        });
    }
}

/// Fan-out that discards everything.
pub struct NoopFanout;

impl Fanout for NoopFanout {
    fn notify(&self, _channel: &str, _payload: serde_json::Value) {}
}
