//! Persisted records of the FleetGrid state store.

use serde::{Deserialize, Serialize};

use fleet_core::{Edge, Node, RobotId};

// ── Command outbox ─────────────────────────────────────────────────

/// Lifecycle of an outbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Published, waiting for an ack.
    Pending,
    /// Positively acknowledged. Terminal.
    Acked,
    /// Retries exhausted. Terminal.
    DeadLetter,
}

impl OutboxStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OutboxStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Acked => "acked",
            OutboxStatus::DeadLetter => "dead_letter",
        }
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "acked" => Ok(OutboxStatus::Acked),
            "dead_letter" => Ok(OutboxStatus::DeadLetter),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// Durable record of a command awaiting acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub outbox_id: String,
    /// Correlation id of the most recent attempt.
    pub correlation_id: String,
    pub robot_id: RobotId,
    /// Subject the command is (re)published to.
    pub subject: String,
    pub payload: serde_json::Value,
    /// Unix epoch millis.
    pub created_at: u64,
    /// Unix epoch millis of the most recent publish.
    pub last_attempt: u64,
    pub retry_count: u32,
    pub status: OutboxStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Set once the dead-letter record of a `DeadLetter` entry has been
    /// published.
    #[serde(default)]
    pub dead_letter_published: bool,
}

// ── Map import ─────────────────────────────────────────────────────

/// A map as exchanged with map-editing tools: nodes plus edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// What an import wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub nodes: usize,
    pub edges: usize,
}
