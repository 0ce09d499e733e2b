//! Shared types used across FleetGrid crates.

use std::fmt;
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Identifier of a map (one graph per map).
pub type MapId = i64;

/// Identifier of a graph node.
pub type NodeId = i64;

/// Identifier of a graph edge ("path").
pub type EdgeId = i64;

/// Identifier of a robot, as reported by the robot itself.
pub type RobotId = String;

/// Tolerance used for coincidence checks in map coordinates.
pub const POSITION_EPSILON: f64 = 1e-6;

// ── Geometry primitives ────────────────────────────────────────────

/// A point in map coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[inline]
    pub fn distance(self, other: Point) -> f64 {
        (self - other).length()
    }

    /// Length of this point interpreted as a vector.
    #[inline]
    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    #[inline]
    pub fn dot(self, other: Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Linear interpolation towards `other` (`t = 0` is `self`).
    #[inline]
    pub fn lerp(self, other: Point, t: f64) -> Point {
        self + (other - self) * t
    }

    /// True if both points coincide within [`POSITION_EPSILON`].
    #[inline]
    pub fn approx_eq(self, other: Point) -> bool {
        self.distance(other) <= POSITION_EPSILON
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;
    fn mul(self, rhs: f64) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

// ── Map graph ──────────────────────────────────────────────────────

/// A point anchor in the map graph (e.g. a junction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub map_id: MapId,
    pub position: Point,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub junction_speed_limit: Option<f64>,
}

impl Node {
    /// A node can be routed through when it is active and not under maintenance.
    pub fn is_usable(&self) -> bool {
        self.active && !self.maintenance
    }
}

/// A traversable connection between two nodes with real-world geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub map_id: MapId,
    pub start_node_id: NodeId,
    pub end_node_id: NodeId,
    #[serde(default)]
    pub bidirectional: bool,
    /// Ordered polyline from the start node to the end node.
    pub geometry: Vec<Point>,
    pub length: f64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub speed_limit: Option<f64>,
    #[serde(default)]
    pub is_rest_path: bool,
    #[serde(default)]
    pub rest_capacity: Option<u32>,
}

impl Edge {
    /// Inactive and maintenance edges are never routed over nor granted.
    pub fn is_traversable(&self) -> bool {
        self.active && !self.maintenance
    }

    /// Direction in which this edge connects `from` to `to`, if it does.
    ///
    /// One-way edges only match their declared direction.
    pub fn direction_between(&self, from: NodeId, to: NodeId) -> Option<TraversalDirection> {
        if self.start_node_id == from && self.end_node_id == to {
            Some(TraversalDirection::Forward)
        } else if self.bidirectional && self.start_node_id == to && self.end_node_id == from {
            Some(TraversalDirection::Reverse)
        } else {
            None
        }
    }

    /// Node at which a traversal in `direction` starts.
    pub fn entry_node(&self, direction: TraversalDirection) -> NodeId {
        match direction {
            TraversalDirection::Forward => self.start_node_id,
            TraversalDirection::Reverse => self.end_node_id,
        }
    }

    /// Node at which a traversal in `direction` ends.
    pub fn exit_node(&self, direction: TraversalDirection) -> NodeId {
        match direction {
            TraversalDirection::Forward => self.end_node_id,
            TraversalDirection::Reverse => self.start_node_id,
        }
    }

    /// Check that the geometry is anchored on both end nodes.
    pub fn check_topology(&self, start: &Node, end: &Node) -> Result<(), String> {
        if self.geometry.len() < 2 {
            return Err(format!(
                "edge {} geometry has {} point(s), need at least 2",
                self.id,
                self.geometry.len()
            ));
        }
        if start.id != self.start_node_id || end.id != self.end_node_id {
            return Err(format!("edge {} checked against the wrong nodes", self.id));
        }
        let first = self.geometry[0];
        let last = self.geometry[self.geometry.len() - 1];
        if !first.approx_eq(start.position) {
            return Err(format!(
                "edge {} starts at {first} but node {} is at {}",
                self.id, start.id, start.position
            ));
        }
        if !last.approx_eq(end.position) {
            return Err(format!(
                "edge {} ends at {last} but node {} is at {}",
                self.id, end.id, end.position
            ));
        }
        if start.map_id != self.map_id || end.map_id != self.map_id {
            return Err(format!("edge {} links nodes of another map", self.id));
        }
        Ok(())
    }
}

/// Direction of travel along an edge relative to its declared geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalDirection {
    /// From `start_node_id` to `end_node_id`.
    Forward,
    /// From `end_node_id` to `start_node_id` (bidirectional edges only).
    Reverse,
}

// ── Robot state ────────────────────────────────────────────────────

/// Operational state reported by a robot.
///
/// Robots report free text; [`RobotState::parse`] maps it onto this enum.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RobotState {
    Idle,
    Stopped,
    Paused,
    Charging,
    Fault,
    Moving,
    Docking,
    #[default]
    Unknown,
    Other(String),
}

impl RobotState {
    /// Case-insensitive mapping from a robot-reported state string.
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim().to_ascii_lowercase();
        if s.is_empty() || s == "unknown" {
            RobotState::Unknown
        } else if s.contains("idle") {
            RobotState::Idle
        } else if s.contains("stop") || s.contains("halt") {
            RobotState::Stopped
        } else if s.contains("pause") {
            RobotState::Paused
        } else if s.contains("charg") {
            RobotState::Charging
        } else if s.contains("fault") || s.contains("error") || s.contains("estop") {
            RobotState::Fault
        } else if s.contains("dock") {
            RobotState::Docking
        } else if s.contains("mov") || s.contains("driv") || s.contains("navigat") {
            RobotState::Moving
        } else {
            RobotState::Other(raw.trim().to_string())
        }
    }

    /// True when a robot in this state is expected to stay where it is.
    ///
    /// Only these states can block a robot behind them.
    pub fn is_stationary(&self) -> bool {
        matches!(
            self,
            RobotState::Idle
                | RobotState::Stopped
                | RobotState::Paused
                | RobotState::Charging
                | RobotState::Fault
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            RobotState::Idle => "idle",
            RobotState::Stopped => "stopped",
            RobotState::Paused => "paused",
            RobotState::Charging => "charging",
            RobotState::Fault => "fault",
            RobotState::Moving => "moving",
            RobotState::Docking => "docking",
            RobotState::Unknown => "unknown",
            RobotState::Other(s) => s,
        }
    }
}

impl From<String> for RobotState {
    fn from(raw: String) -> Self {
        RobotState::parse(&raw)
    }
}

impl From<RobotState> for String {
    fn from(state: RobotState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}
