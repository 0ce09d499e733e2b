//! fleetgrid-planner — the Route Planner.
//!
//! # Architecture
//!
//! ```text
//!  RouteRequest
//!       │
//!       ▼
//!  fetch nodes + active edges (bounded) ──► MapSnapshot
//!       │
//!       ▼
//!  anchor current / destination ──► nearest endpoint on active edges
//!       │
//!       ▼
//!  PathService (optional, validated) ─or─ Dijkstra over SearchGraph
//!       │
//!       ▼
//!  sample_route ──► RoutePlan { nodeIds, pathIds, waypoints, ... }
//! ```
//!
//! Planning is read-only against the graph and never touches occupancy, so
//! any number of requests can run in parallel.

pub mod dijkstra;
pub mod error;
pub mod planner;
pub mod sampler;

pub use dijkstra::{PathHop, SearchGraph, ShortestPath};
pub use error::{PlannerError, PlannerResult};
pub use planner::{PathFuture, PathService, PlanPhase, PlannerSettings, RoutePlanner};
pub use sampler::sample_route;
