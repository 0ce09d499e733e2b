//! Message contracts exchanged with robots and external collaborators.
//!
//! All payloads are JSON with camelCase field names. These structs are the
//! stable boundary; subject naming lives in `fleetgrid-bus`.

use serde::{Deserialize, Serialize};

use crate::types::{EdgeId, MapId, NodeId, Point, RobotId, RobotState};

// ── Routing ────────────────────────────────────────────────────────

/// A robot asks for a route from where it is to a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequest {
    pub robot_id: RobotId,
    pub map_id: MapId,
    /// The robot's actual current position.
    pub current: Point,
    pub destination: Point,
}

/// A planned route. Immutable once produced; a newer plan for the same
/// robot supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlan {
    pub robot_id: RobotId,
    pub map_id: MapId,
    pub node_ids: Vec<NodeId>,
    pub path_ids: Vec<EdgeId>,
    pub waypoints: Vec<Point>,
    pub total_length: f64,
    pub recommended_speed: f64,
}

/// Why a route could not be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteFailureReason {
    /// A position could not be resolved to a graph node.
    NoAnchor,
    /// The anchors are not connected in the active graph.
    NoPath,
    /// The map graph could not be queried in time.
    GraphUnavailable,
}

/// Structured "unreachable goal" report sent back to the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteFailure {
    pub robot_id: RobotId,
    pub map_id: MapId,
    pub reason: RouteFailureReason,
    pub message: String,
}

// ── Traffic ────────────────────────────────────────────────────────

/// A robot announces it is about to traverse a segment of its route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRequest {
    pub robot_id: RobotId,
    pub map_id: MapId,
    /// Sampled points the robot is about to traverse, in order.
    pub lookahead: Vec<Point>,
    /// Nominal length of the segment.
    pub length: f64,
}

/// Answer to a [`SegmentRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionDecision {
    pub robot_id: RobotId,
    pub allow: bool,
    /// How far the robot may advance. `None` when denied.
    pub limit_meters: Option<f64>,
}

impl AdmissionDecision {
    pub fn allow(robot_id: &str, limit: f64) -> Self {
        Self {
            robot_id: robot_id.to_string(),
            allow: true,
            limit_meters: Some(limit),
        }
    }

    pub fn deny(robot_id: &str) -> Self {
        Self {
            robot_id: robot_id.to_string(),
            allow: false,
            limit_meters: None,
        }
    }
}

/// Liveness signal: the robot's session is gone, release what it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSignal {
    pub robot_id: RobotId,
    #[serde(default)]
    pub reason: Option<String>,
}

// ── Telemetry ──────────────────────────────────────────────────────

/// Telemetry update, one variant per telemetry kind.
///
/// Optional fields that are absent keep the previously known value.
/// Timestamps are seconds since the Unix epoch, as stamped by the robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryUpdate {
    /// Position report.
    #[serde(rename_all = "camelCase")]
    Pose {
        robot_id: RobotId,
        #[serde(default)]
        map_id: Option<MapId>,
        x: f64,
        y: f64,
        timestamp: f64,
    },
    /// State-machine report.
    #[serde(rename_all = "camelCase")]
    Status {
        robot_id: RobotId,
        state: RobotState,
        timestamp: f64,
    },
    /// Combined report where every field is optional.
    #[serde(rename_all = "camelCase")]
    Snapshot {
        robot_id: RobotId,
        #[serde(default)]
        map_id: Option<MapId>,
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
        #[serde(default)]
        state: Option<RobotState>,
        timestamp: f64,
    },
}

impl TelemetryUpdate {
    pub fn robot_id(&self) -> &str {
        match self {
            TelemetryUpdate::Pose { robot_id, .. }
            | TelemetryUpdate::Status { robot_id, .. }
            | TelemetryUpdate::Snapshot { robot_id, .. } => robot_id,
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            TelemetryUpdate::Pose { timestamp, .. }
            | TelemetryUpdate::Status { timestamp, .. }
            | TelemetryUpdate::Snapshot { timestamp, .. } => *timestamp,
        }
    }
}

// ── Commands ───────────────────────────────────────────────────────

/// Wire envelope of an outbound command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub outbox_id: String,
    pub correlation_id: String,
    pub robot_id: RobotId,
    pub attempt: u32,
    pub payload: serde_json::Value,
}

/// Acknowledgement of a command, positive or negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    pub correlation_id: String,
    pub ok: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A command that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub outbox_id: String,
    pub robot_id: RobotId,
    pub subject: String,
    pub payload: serde_json::Value,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_plan_uses_camel_case() {
        let plan = RoutePlan {
            robot_id: "r1".to_string(),
            map_id: 1,
            node_ids: vec![1, 2],
            path_ids: vec![10],
            waypoints: vec![Point::new(0.0, 0.0)],
            total_length: 10.0,
            recommended_speed: 1.0,
        };
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["nodeIds"], serde_json::json!([1, 2]));
        assert_eq!(json["totalLength"], serde_json::json!(10.0));
        assert!(json.get("node_ids").is_none());
    }

    #[test]
    fn denied_decision_has_null_limit() {
        let json = serde_json::to_value(AdmissionDecision::deny("r1")).unwrap();
        assert_eq!(json["allow"], serde_json::json!(false));
        assert!(json["limitMeters"].is_null());
    }

    #[test]
    fn telemetry_kinds_parse() {
        let pose: TelemetryUpdate = serde_json::from_str(
            r#"{"kind":"pose","robotId":"r1","mapId":3,"x":1.0,"y":2.0,"timestamp":10.5}"#,
        )
        .unwrap();
        assert_eq!(pose.robot_id(), "r1");
        assert_eq!(pose.timestamp(), 10.5);

        let status: TelemetryUpdate =
            serde_json::from_str(r#"{"kind":"status","robotId":"r1","state":"IDLE","timestamp":11}"#)
                .unwrap();
        assert!(matches!(
            status,
            TelemetryUpdate::Status { state: RobotState::Idle, .. }
        ));

        let snap: TelemetryUpdate =
            serde_json::from_str(r#"{"kind":"snapshot","robotId":"r2","timestamp":1}"#).unwrap();
        assert!(matches!(
            snap,
            TelemetryUpdate::Snapshot { x: None, state: None, .. }
        ));
    }
}
