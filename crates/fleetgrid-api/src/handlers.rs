//! REST API handlers.
//!
//! Each handler delegates to [`FleetService`](crate::FleetService) and
//! returns JSON responses.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use fleet_core::{
    CommandAck, MapId, RouteFailureReason, RouteRequest, SegmentRequest,
    TelemetryUpdate,
};
use fleetgrid_state::{MapDocument, OutboxStatus, StateError};
use fleetgrid_traffic::ApplyOutcome;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    /// Failure that still carries a structured body.
    fn failed(data: T, msg: &str) -> Json<Self> {
        Json(Self {
            success: false,
            data: Some(data),
            error: Some(msg.to_string()),
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Routes ─────────────────────────────────────────────────────

/// POST /api/v1/routes
pub async fn plan_route(
    State(state): State<ApiState>,
    Json(req): Json<RouteRequest>,
) -> impl IntoResponse {
    match state.service.plan_route(&req).await {
        Ok(plan) => ApiResponse::ok(plan).into_response(),
        Err(failure) => {
            let status = match failure.reason {
                RouteFailureReason::GraphUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                RouteFailureReason::NoAnchor | RouteFailureReason::NoPath => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
            };
            let msg = failure.message.clone();
            (status, ApiResponse::failed(failure, &msg)).into_response()
        }
    }
}

// ── Traffic ────────────────────────────────────────────────────

/// POST /api/v1/traffic/admissions
pub async fn request_admission(
    State(state): State<ApiState>,
    Json(req): Json<SegmentRequest>,
) -> impl IntoResponse {
    let admission = state.service.admit(&req).await;
    ApiResponse::ok(admission.decision)
}

/// GET /api/v1/traffic/{map_id}/occupancy
pub async fn get_occupancy(
    State(state): State<ApiState>,
    Path(map_id): Path<MapId>,
) -> impl IntoResponse {
    ApiResponse::ok(state.service.occupancy().snapshot(map_id))
}

// ── Robots ─────────────────────────────────────────────────────

/// Optional reason for a release.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ReleaseQuery {
    pub reason: Option<String>,
}

/// POST /api/v1/robots/{id}/release
pub async fn release_robot(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<ReleaseQuery>,
) -> impl IntoResponse {
    let reason = query.reason.as_deref().unwrap_or("api request");
    let released = state.service.release_robot(&id, Some(reason));
    ApiResponse::ok(serde_json::json!({
        "robotId": id,
        "released": released,
    }))
}

/// POST /api/v1/telemetry
pub async fn ingest_telemetry(
    State(state): State<ApiState>,
    Json(update): Json<TelemetryUpdate>,
) -> impl IntoResponse {
    let outcome = state.service.ingest_telemetry(&update);
    ApiResponse::ok(serde_json::json!({
        "applied": outcome == ApplyOutcome::Applied,
    }))
}

/// GET /api/v1/robots
pub async fn list_robots(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.service.positions().views(std::time::Instant::now()))
}

/// GET /api/v1/robots/{id}
pub async fn get_robot(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.positions().get(&id) {
        Some(position) => ApiResponse::ok(position.view(std::time::Instant::now())).into_response(),
        None => error_response("robot not found", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Maps ───────────────────────────────────────────────────────

/// POST /api/v1/maps
pub async fn import_map(
    State(state): State<ApiState>,
    Json(doc): Json<MapDocument>,
) -> impl IntoResponse {
    match state.service.store().import_map(&doc) {
        Ok(summary) => (StatusCode::CREATED, ApiResponse::ok(summary)).into_response(),
        Err(e @ StateError::InvalidMap(_)) => {
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/maps/{map_id}/nodes
pub async fn list_map_nodes(
    State(state): State<ApiState>,
    Path(map_id): Path<MapId>,
) -> impl IntoResponse {
    match state.service.store().list_nodes(map_id) {
        Ok(nodes) => ApiResponse::ok(nodes).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/maps/{map_id}/edges
pub async fn list_map_edges(
    State(state): State<ApiState>,
    Path(map_id): Path<MapId>,
) -> impl IntoResponse {
    match state.service.store().list_edges(map_id) {
        Ok(edges) => ApiResponse::ok(edges).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Commands ───────────────────────────────────────────────────

/// Outbox listing filter.
#[derive(Debug, Default, serde::Deserialize)]
pub struct OutboxQuery {
    pub status: Option<String>,
}

/// GET /api/v1/outbox?status=pending
pub async fn list_outbox(
    State(state): State<ApiState>,
    Query(query): Query<OutboxQuery>,
) -> impl IntoResponse {
    let status = match query.status.as_deref().map(str::parse::<OutboxStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => return error_response(&e, StatusCode::BAD_REQUEST).into_response(),
    };
    match state.service.outbox().entries(status) {
        Ok(entries) => ApiResponse::ok(entries).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/commands/ack
pub async fn ack_command(
    State(state): State<ApiState>,
    Json(ack): Json<CommandAck>,
) -> impl IntoResponse {
    match state.service.handle_ack(&ack).await {
        Ok(outcome) => ApiResponse::ok(outcome).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.service.render_metrics(),
    )
}
