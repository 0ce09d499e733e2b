//! Standalone regression tests.
//!
//! Drives the REST router end to end: map import, route planning,
//! telemetry, admission, release, outbox inspection and metrics.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use fleet_core::FleetConfig;
use fleetgrid_api::{FleetService, build_router};
use fleetgrid_bus::{InMemoryBus, NoopFanout};
use fleetgrid_state::StateStore;

fn test_router() -> Router {
    let service = FleetService::new(
        StateStore::open_in_memory().unwrap(),
        Arc::new(InMemoryBus::new()),
        Arc::new(NoopFanout),
        &FleetConfig::default(),
    )
    .unwrap();
    build_router(Arc::new(service))
}

/// Straight corridor from N1(0,0) to N2(10,0), bidirectional.
fn corridor_map() -> Value {
    json!({
        "nodes": [
            {"id": 1, "mapId": 1, "position": {"x": 0.0, "y": 0.0}},
            {"id": 2, "mapId": 1, "position": {"x": 10.0, "y": 0.0}}
        ],
        "edges": [{
            "id": 100, "mapId": 1, "startNodeId": 1, "endNodeId": 2,
            "bidirectional": true,
            "geometry": [{"x": 0.0, "y": 0.0}, {"x": 10.0, "y": 0.0}],
            "length": 10.0
        }]
    })
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn import_corridor(router: &Router) {
    let (status, body) = send(router, "POST", "/api/v1/maps", Some(corridor_map())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["edges"], 1);
}

#[tokio::test]
async fn standalone_import_and_list_map() {
    let router = test_router();
    import_corridor(&router).await;

    let (status, body) = send(&router, "GET", "/api/v1/maps/1/nodes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) = send(&router, "GET", "/api/v1/maps/1/edges", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], 100);
}

#[tokio::test]
async fn standalone_route_along_corridor() {
    let router = test_router();
    import_corridor(&router).await;

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/routes",
        Some(json!({
            "robotId": "r1",
            "mapId": 1,
            "current": {"x": 0.0, "y": 0.0},
            "destination": {"x": 10.0, "y": 0.0}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["nodeIds"], json!([1, 2]));
    assert_eq!(body["data"]["totalLength"], 10.0);
    let waypoints = body["data"]["waypoints"].as_array().unwrap();
    assert_eq!(waypoints.last().unwrap(), &json!({"x": 10.0, "y": 0.0}));

    let (status, body) = send(&router, "GET", "/api/v1/outbox?status=pending", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["robotId"], "r1");
}

#[tokio::test]
async fn standalone_route_without_map_is_unprocessable() {
    let router = test_router();
    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/routes",
        Some(json!({
            "robotId": "r1",
            "mapId": 42,
            "current": {"x": 0.0, "y": 0.0},
            "destination": {"x": 1.0, "y": 0.0}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["reason"], "no_anchor");
}

#[tokio::test]
async fn standalone_admission_limited_by_idle_robot_ahead() {
    let router = test_router();
    import_corridor(&router).await;

    // R1 idle at arc 3.
    for update in [
        json!({"kind": "pose", "robotId": "r1", "mapId": 1, "x": 3.0, "y": 0.0, "timestamp": 100.0}),
        json!({"kind": "status", "robotId": "r1", "state": "idle", "timestamp": 100.0}),
    ] {
        let (status, _) = send(&router, "POST", "/api/v1/telemetry", Some(update)).await;
        assert_eq!(status, StatusCode::OK);
    }

    // R2 enters from arc 0 asking for 5.
    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/traffic/admissions",
        Some(json!({
            "robotId": "r2",
            "mapId": 1,
            "lookahead": [{"x": 0.0, "y": 0.0}, {"x": 2.5, "y": 0.0}, {"x": 5.0, "y": 0.0}],
            "length": 5.0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["allow"], true);
    assert_eq!(body["data"]["limitMeters"], 2.0);

    let (_, body) = send(&router, "GET", "/api/v1/traffic/1/occupancy", None).await;
    assert_eq!(body["data"]["held"][0]["robotId"], "r2");

    // Release frees the edge.
    let (status, body) = send(&router, "POST", "/api/v1/robots/r2/release?reason=test", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["released"], 1);
    let (_, body) = send(&router, "GET", "/api/v1/traffic/1/occupancy", None).await;
    assert!(body["data"]["held"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn standalone_robots_listing() {
    let router = test_router();
    let (status, body) = send(&router, "GET", "/api/v1/robots", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = send(&router, "GET", "/api/v1/robots/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn standalone_uncorrelated_ack() {
    let router = test_router();
    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/commands/ack",
        Some(json!({"correlationId": "missing", "ok": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "uncorrelated");
}

#[tokio::test]
async fn standalone_metrics_endpoint() {
    let router = test_router();
    let req = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("fleetgrid_routes_planned_total 0"));
}
