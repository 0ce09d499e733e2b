//! fleetgrid-traffic — the Traffic Admission Arbiter.
//!
//! # Architecture
//!
//! ```text
//!  telemetry ──► LivePositionCache (DashMap, lock-free reads)
//!                       │ fresh, stationary robots
//!                       ▼
//!  SegmentRequest ──► TrafficArbiter ──► MapSnapshot (bounded graph fetch)
//!                       │   resolve key, ahead-limit
//!                       ▼
//!                 OccupancyService (one lock per map)
//!                       │ claim / release in one critical section
//!                       ▼
//!                 AdmissionDecision { allow, limitMeters }
//!
//!  PresenceMonitor ──► release robots that went silent
//! ```
//!
//! Graph I/O happens before any lock is taken; the occupancy critical
//! section only touches in-memory maps.

pub mod arbiter;
pub mod occupancy;
pub mod positions;
pub mod presence;

pub use arbiter::{Admission, AdmissionOutcome, TrafficArbiter, TrafficSettings};
pub use occupancy::{ClaimOutcome, HeldKey, OccupancyKey, OccupancyService, OccupancySnapshot};
pub use positions::{ApplyOutcome, LivePositionCache, PositionView, RobotPosition};
pub use presence::{OfflineCallback, PresenceMonitor};
