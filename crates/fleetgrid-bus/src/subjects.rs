//! Subject names. Payload contracts live in `fleet_core::messages`.

/// Route requests in.
pub const ROUTE_REQUEST: &str = "fleet.route.request";

/// Segment admission requests in.
pub const SEGMENT_REQUEST: &str = "fleet.traffic.segment";

/// Telemetry updates in.
pub const TELEMETRY: &str = "fleet.telemetry.v1";

/// Command acknowledgements in.
pub const COMMAND_ACK: &str = "fleet.command.ack";

/// Robot session liveness: release everything the robot holds.
pub const ROBOT_OFFLINE: &str = "fleet.robot.offline";

/// Commands that exhausted their retries.
pub const DEAD_LETTER: &str = "fleet.command.dead_letter";

/// Realtime fan-out of published routes.
pub const REALTIME_ROUTES: &str = "realtime.routes";

/// Realtime fan-out of admission decisions and occupancy.
pub const REALTIME_OCCUPANCY: &str = "realtime.occupancy";

/// Route plans and route failures for one robot.
pub fn robot_route(robot_id: &str) -> String {
    format!("fleet.robot.{robot_id}.route")
}

/// Admission decisions for one robot.
pub fn robot_traffic(robot_id: &str) -> String {
    format!("fleet.robot.{robot_id}.traffic")
}
