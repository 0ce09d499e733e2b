//! CommandOutbox — reliable delivery of robot commands.
//!
//! Every command is written to the outbox before it is published. An ack
//! closes the entry; a NAK (or an ack that never comes) re-publishes the
//! same payload under a fresh correlation id until `max_retries` NAKs have
//! been seen, after which the command is dead-lettered. A dead-letter record
//! that could not be published is retried by the redelivery sweep.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fleet_core::config::{ConfigError, DispatchConfig};
use fleet_core::{CommandAck, CommandEnvelope, DeadLetterRecord, epoch_millis};
use fleetgrid_bus::{Transport, publish_json, subjects};
use fleetgrid_state::{OutboxEntry, OutboxStatus, StateStore};

use crate::error::DispatchResult;

/// Reason recorded when a command was never acknowledged.
pub const ACK_TIMEOUT_REASON: &str = "ack timeout";

/// Outbox tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    pub max_retries: u32,
    pub ack_timeout: Duration,
    pub publish_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            ack_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(2),
        }
    }
}

impl DispatchSettings {
    pub fn from_config(config: &DispatchConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            max_retries: config.max_retries,
            ack_timeout: config.ack_timeout()?,
            publish_timeout: config.publish_timeout()?,
        })
    }
}

/// State change caused by one acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckTransition {
    Acked,
    /// Re-publish under the entry's new correlation id.
    Retry,
    DeadLetter,
}

/// Apply an ack or NAK to a pending entry.
///
/// Each NAK counts against `max_retries`; the NAK that reaches it
/// dead-letters the entry instead of scheduling another attempt.
pub fn apply_ack(
    entry: &mut OutboxEntry,
    ok: bool,
    reason: Option<&str>,
    max_retries: u32,
    next_correlation_id: impl FnOnce() -> String,
    now_ms: u64,
) -> AckTransition {
    if ok {
        entry.status = OutboxStatus::Acked;
        return AckTransition::Acked;
    }
    entry.retry_count += 1;
    entry.last_error = Some(reason.unwrap_or("nak").to_string());
    if entry.retry_count >= max_retries {
        entry.status = OutboxStatus::DeadLetter;
        return AckTransition::DeadLetter;
    }
    entry.correlation_id = next_correlation_id();
    entry.last_attempt = now_ms;
    AckTransition::Retry
}

/// What handling an ack did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AckOutcome {
    Acked { outbox_id: String },
    Retried { outbox_id: String, attempt: u32 },
    DeadLettered { outbox_id: String },
    /// No pending entry carries the correlation id.
    Uncorrelated { correlation_id: String },
}

pub struct CommandOutbox {
    store: StateStore,
    transport: Arc<dyn Transport>,
    settings: DispatchSettings,
}

impl CommandOutbox {
    pub fn new(store: StateStore, transport: Arc<dyn Transport>, settings: DispatchSettings) -> Self {
        Self {
            store,
            transport,
            settings,
        }
    }

    /// Record a command and publish it.
    ///
    /// A failed publish leaves the entry pending; the redelivery sweep
    /// retries it once the ack timeout has passed.
    pub async fn send(
        &self,
        robot_id: &str,
        subject: &str,
        payload: serde_json::Value,
    ) -> DispatchResult<OutboxEntry> {
        let now = epoch_millis();
        let entry = OutboxEntry {
            outbox_id: Uuid::new_v4().to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            robot_id: robot_id.to_string(),
            subject: subject.to_string(),
            payload,
            created_at: now,
            last_attempt: now,
            retry_count: 0,
            status: OutboxStatus::Pending,
            last_error: None,
            dead_letter_published: false,
        };
        self.store.insert_outbox(&entry)?;
        debug!(outbox_id = %entry.outbox_id, %robot_id, %subject, "command queued");

        if let Err(e) = self.publish_attempt(&entry).await {
            warn!(outbox_id = %entry.outbox_id, error = %e, "command publish failed, awaiting redelivery");
        }
        Ok(entry)
    }

    /// Correlate an ack and act on it.
    pub async fn handle_ack(&self, ack: &CommandAck) -> DispatchResult<AckOutcome> {
        self.resolve(&ack.correlation_id, ack.ok, ack.reason.as_deref())
            .await
    }

    /// Treat every pending entry not acknowledged within the ack timeout as
    /// NAKed, then retry dead-letter records that were never published.
    ///
    /// A failure on one entry is logged and the sweep moves on.
    pub async fn redeliver_overdue(&self, now_ms: u64) -> DispatchResult<Vec<AckOutcome>> {
        let timeout_ms = self.settings.ack_timeout.as_millis() as u64;
        let overdue: Vec<OutboxEntry> = self
            .store
            .list_outbox(Some(OutboxStatus::Pending))?
            .into_iter()
            .filter(|e| now_ms.saturating_sub(e.last_attempt) >= timeout_ms)
            .collect();

        let mut outcomes = Vec::with_capacity(overdue.len());
        for entry in overdue {
            match self
                .resolve(&entry.correlation_id, false, Some(ACK_TIMEOUT_REASON))
                .await
            {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(outbox_id = %entry.outbox_id, error = %e, "redelivery failed, retrying next sweep");
                }
            }
        }
        self.republish_dead_letters().await?;
        Ok(outcomes)
    }

    /// Publish the dead-letter records still missing. Returns how many went out.
    pub async fn republish_dead_letters(&self) -> DispatchResult<usize> {
        let unpublished: Vec<OutboxEntry> = self
            .store
            .list_outbox(Some(OutboxStatus::DeadLetter))?
            .into_iter()
            .filter(|e| !e.dead_letter_published)
            .collect();

        let mut published = 0;
        for entry in unpublished {
            match self.publish_dead_letter(&entry).await {
                Ok(()) => {
                    info!(outbox_id = %entry.outbox_id, "dead-letter record published late");
                    published += 1;
                }
                Err(e) => {
                    warn!(outbox_id = %entry.outbox_id, error = %e, "dead-letter publish failed again");
                }
            }
        }
        Ok(published)
    }

    pub fn entries(&self, status: Option<OutboxStatus>) -> DispatchResult<Vec<OutboxEntry>> {
        Ok(self.store.list_outbox(status)?)
    }

    async fn resolve(&self, correlation_id: &str, ok: bool, reason: Option<&str>) -> DispatchResult<AckOutcome> {
        let max_retries = self.settings.max_retries;
        let now = epoch_millis();
        let updated = self.store.update_outbox_by_correlation(correlation_id, |entry| {
            apply_ack(entry, ok, reason, max_retries, || Uuid::new_v4().to_string(), now)
        })?;

        let Some((entry, transition)) = updated else {
            warn!(%correlation_id, ok, "ack does not match any pending command, ignored");
            return Ok(AckOutcome::Uncorrelated {
                correlation_id: correlation_id.to_string(),
            });
        };

        match transition {
            AckTransition::Acked => {
                debug!(outbox_id = %entry.outbox_id, "command acknowledged");
                Ok(AckOutcome::Acked {
                    outbox_id: entry.outbox_id,
                })
            }
            AckTransition::Retry => {
                info!(
                    outbox_id = %entry.outbox_id,
                    attempt = entry.retry_count + 1,
                    reason = reason.unwrap_or("nak"),
                    "command NAKed, retrying"
                );
                if let Err(e) = self.publish_attempt(&entry).await {
                    warn!(outbox_id = %entry.outbox_id, error = %e, "retry publish failed, awaiting redelivery");
                }
                Ok(AckOutcome::Retried {
                    attempt: entry.retry_count + 1,
                    outbox_id: entry.outbox_id,
                })
            }
            AckTransition::DeadLetter => {
                error!(
                    outbox_id = %entry.outbox_id,
                    robot_id = %entry.robot_id,
                    subject = %entry.subject,
                    retries = entry.retry_count,
                    reason = entry.last_error.as_deref().unwrap_or_default(),
                    "command retries exhausted, dead-lettered"
                );
                if let Err(e) = self.publish_dead_letter(&entry).await {
                    warn!(outbox_id = %entry.outbox_id, error = %e, "dead-letter publish failed, retrying next sweep");
                }
                Ok(AckOutcome::DeadLettered {
                    outbox_id: entry.outbox_id,
                })
            }
        }
    }

    async fn publish_dead_letter(&self, entry: &OutboxEntry) -> DispatchResult<()> {
        let record = DeadLetterRecord {
            outbox_id: entry.outbox_id.clone(),
            robot_id: entry.robot_id.clone(),
            subject: entry.subject.clone(),
            payload: entry.payload.clone(),
            reason: entry.last_error.clone().unwrap_or_default(),
        };
        publish_json(
            self.transport.as_ref(),
            subjects::DEAD_LETTER,
            &record,
            self.settings.publish_timeout,
        )
        .await?;
        self.store.mark_dead_letter_published(&entry.outbox_id)?;
        Ok(())
    }

    async fn publish_attempt(&self, entry: &OutboxEntry) -> DispatchResult<()> {
        let envelope = CommandEnvelope {
            outbox_id: entry.outbox_id.clone(),
            correlation_id: entry.correlation_id.clone(),
            robot_id: entry.robot_id.clone(),
            attempt: entry.retry_count + 1,
            payload: entry.payload.clone(),
        };
        publish_json(
            self.transport.as_ref(),
            &entry.subject,
            &envelope,
            self.settings.publish_timeout,
        )
        .await?;
        Ok(())
    }
}
