//! fleetgrid-api — service facade and REST API for FleetGrid.
//!
//! [`FleetService`] owns the planner, arbiter and outbox and is what both
//! the REST handlers and the daemon's bus workers call into.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/routes` | Plan a route and dispatch it |
//! | POST | `/api/v1/traffic/admissions` | Request segment admission |
//! | GET | `/api/v1/traffic/:map_id/occupancy` | Occupancy of one map |
//! | POST | `/api/v1/telemetry` | Ingest a telemetry update |
//! | GET | `/api/v1/robots` | Live positions |
//! | GET | `/api/v1/robots/:id` | One robot's live position |
//! | POST | `/api/v1/robots/:id/release` | Force-release a robot |
//! | POST | `/api/v1/maps` | Import a map document |
//! | GET | `/api/v1/maps/:map_id/nodes` | Nodes of a map |
//! | GET | `/api/v1/maps/:map_id/edges` | Edges of a map |
//! | GET | `/api/v1/outbox` | Outbox entries (`?status=`) |
//! | POST | `/api/v1/commands/ack` | Acknowledge a command |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;
pub mod service;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

pub use service::FleetService;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<FleetService>,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(service: Arc<FleetService>) -> Router {
    let api_state = ApiState { service };

    let api_routes = Router::new()
        .route("/routes", post(handlers::plan_route))
        .route("/traffic/admissions", post(handlers::request_admission))
        .route("/traffic/{map_id}/occupancy", get(handlers::get_occupancy))
        .route("/telemetry", post(handlers::ingest_telemetry))
        .route("/robots", get(handlers::list_robots))
        .route("/robots/{id}", get(handlers::get_robot))
        .route("/robots/{id}/release", post(handlers::release_robot))
        .route("/maps", post(handlers::import_map))
        .route("/maps/{map_id}/nodes", get(handlers::list_map_nodes))
        .route("/maps/{map_id}/edges", get(handlers::list_map_edges))
        .route("/outbox", get(handlers::list_outbox))
        .route("/commands/ack", post(handlers::ack_command))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(api_state))
}
