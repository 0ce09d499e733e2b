//! Error types for the message transport.

use std::time::Duration;

use thiserror::Error;

pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BusError {
    #[error("failed to encode payload for {subject}: {reason}")]
    Encode { subject: String, reason: String },

    #[error("failed to decode payload from {subject}: {reason}")]
    Decode { subject: String, reason: String },

    #[error("publish to {subject} timed out after {after:?}")]
    Timeout { subject: String, after: Duration },

    #[error("transport closed: {0}")]
    Closed(String),

    #[error("transport error: {0}")]
    Transport(String),
}
