//! fleetgrid-metrics — observability for the FleetGrid service.
//!
//! Counts planned and failed routes, admission decisions, command delivery
//! outcomes and released robots, and renders them in the Prometheus text
//! exposition format.
//!
//! # Architecture
//!
//! ```text
//! FleetMetrics
//!   ├── record_*() ← called by the bus workers and API handlers
//!   ├── snapshot() → MetricsSnapshot (plain numbers, serializable)
//!   └── run() → periodic summary log, resets the latency window
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{FleetMetrics, MetricsSnapshot};
pub use prometheus::render_prometheus;
