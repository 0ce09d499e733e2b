//! fleet-core — types shared by every FleetGrid crate.
//!
//! - [`types`]: map graph nodes/edges, points, robot state
//! - [`messages`]: wire contracts for routes, admissions, telemetry, commands
//! - [`config`]: `fleet.toml` parsing
//! - [`graph`]: the read-only map graph query interface

pub mod config;
pub mod graph;
pub mod messages;
pub mod types;

pub use config::FleetConfig;
pub use graph::{GraphError, GraphFuture, GraphResult, MapGraph};
pub use messages::*;
pub use types::*;

/// Current Unix time in seconds (fractional).
pub fn epoch_secs_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Current Unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
