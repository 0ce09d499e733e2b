//! fleetgrid-dispatch — at-least-once command delivery to robots.
//!
//! ```text
//!   send ──► outbox (Pending) ──► publish envelope ──► robot
//!                 ▲                                       │
//!                 │   NAK / ack timeout: new correlation  │
//!                 └──────────── re-publish ◄──────────────┤
//!                                                         ▼
//!        Acked ◄── ok ack          max_retries NAKs ──► DeadLetter
//! ```
//!
//! Entries are persisted before the first publish, so a crash between the
//! two is recovered by the redelivery sweep.

pub mod error;
pub mod outbox;

pub use error::{DispatchError, DispatchResult};
pub use outbox::{
    ACK_TIMEOUT_REASON, AckOutcome, AckTransition, CommandOutbox, DispatchSettings, apply_ack,
};
