//! TrafficArbiter — admission decisions for "entering segment" requests.
//!
//! The policy is local and greedy: a robot may advance unless a halted
//! robot sits just ahead on the same edge, and no two robots may hold the
//! same directed edge (or junction node) at once. When the request cannot
//! be tied to the graph, the robot is allowed at its requested length and
//! occupancy is left untouched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use fleet_core::config::{ConfigError, TrafficConfig};
use fleet_core::graph::fetch_map;
use fleet_core::{AdmissionDecision, Edge, NodeId, Point, SegmentRequest, TraversalDirection};
use fleetgrid_geometry::{MapSnapshot, project_onto_polyline};

use crate::occupancy::{ClaimOutcome, OccupancyKey, OccupancyService};
use crate::positions::LivePositionCache;

/// Arc-length progress below this does not establish a direction.
const ARC_EPSILON: f64 = 1e-6;

/// Arbiter tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficSettings {
    pub stale_after: Duration,
    pub lateral_tolerance: f64,
    pub safety_buffer: f64,
    pub junction_radius: f64,
    pub graph_timeout: Duration,
}

impl Default for TrafficSettings {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5),
            lateral_tolerance: 0.3,
            safety_buffer: 1.0,
            junction_radius: 0.5,
            graph_timeout: Duration::from_secs(2),
        }
    }
}

impl TrafficSettings {
    pub fn from_config(config: &TrafficConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            stale_after: config.stale_after()?,
            lateral_tolerance: config.lateral_tolerance,
            safety_buffer: config.safety_buffer,
            junction_radius: config.junction_radius,
            graph_timeout: config.graph_timeout()?,
        })
    }
}

/// How a decision was reached.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionOutcome {
    /// Allowed and the key is now held by the requester.
    Granted { key: OccupancyKey },
    /// The segment could not be tied to the graph; allowed without a claim.
    FailOpen { reason: String },
    /// A halted robot ahead leaves no room. `gap` is the distance to it.
    Blocked { gap: f64 },
    /// Another robot holds the key.
    Occupied { holder: String },
}

/// Decision plus the reason behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub decision: AdmissionDecision,
    pub outcome: AdmissionOutcome,
}

/// The resolved traversal a request maps to.
struct Resolved<'a> {
    key: OccupancyKey,
    /// Edge being traversed; `None` for a junction manoeuvre.
    edge: Option<(&'a Edge, TraversalDirection)>,
}

pub struct TrafficArbiter {
    graph: Arc<dyn fleet_core::MapGraph>,
    occupancy: Arc<OccupancyService>,
    positions: Arc<LivePositionCache>,
    settings: TrafficSettings,
}

impl TrafficArbiter {
    pub fn new(
        graph: Arc<dyn fleet_core::MapGraph>,
        occupancy: Arc<OccupancyService>,
        positions: Arc<LivePositionCache>,
        settings: TrafficSettings,
    ) -> Self {
        Self {
            graph,
            occupancy,
            positions,
            settings,
        }
    }

    pub fn occupancy(&self) -> &Arc<OccupancyService> {
        &self.occupancy
    }

    pub fn positions(&self) -> &Arc<LivePositionCache> {
        &self.positions
    }

    pub async fn admit(&self, request: &SegmentRequest) -> Admission {
        self.admit_at(request, Instant::now()).await
    }

    /// Decide on a request, judging telemetry freshness at `now`.
    pub async fn admit_at(&self, request: &SegmentRequest, now: Instant) -> Admission {
        let robot_id = request.robot_id.as_str();
        let map_id = request.map_id;
        let requested = if request.length.is_finite() {
            request.length
        } else {
            0.0
        };

        let (Some(&first), Some(&last)) = (request.lookahead.first(), request.lookahead.last()) else {
            return self.fail_open(request, requested, "empty lookahead");
        };

        let snapshot = match fetch_map(self.graph.as_ref(), map_id, self.settings.graph_timeout).await {
            Ok((nodes, edges)) => MapSnapshot::new(map_id, nodes, edges),
            Err(e) => return self.fail_open(request, requested, &e.to_string()),
        };

        let Some(resolved) = self.resolve(&snapshot, &request.lookahead, first, last) else {
            return self.fail_open(request, requested, "segment not on any active edge");
        };

        let nearest_gap = match resolved.edge {
            Some((edge, direction)) => self.nearest_gap_ahead(&snapshot, robot_id, edge, direction, first, now),
            None => None,
        };
        let admissible = nearest_gap.map_or(requested, |gap| requested.min(self.ahead_limit(gap)));

        if admissible <= 0.0 {
            let gap = nearest_gap.unwrap_or(0.0);
            debug!(%robot_id, map_id, requested, gap, "admission denied, blocked ahead");
            return Admission {
                decision: AdmissionDecision::deny(robot_id),
                outcome: AdmissionOutcome::Blocked { gap },
            };
        }

        match self.occupancy.claim(map_id, resolved.key, robot_id) {
            ClaimOutcome::Granted { released } => {
                debug!(
                    %robot_id,
                    map_id,
                    key = ?resolved.key,
                    limit = admissible,
                    released = released.len(),
                    "admission granted"
                );
                Admission {
                    decision: AdmissionDecision::allow(robot_id, admissible),
                    outcome: AdmissionOutcome::Granted { key: resolved.key },
                }
            }
            ClaimOutcome::Held { holder } => {
                debug!(%robot_id, map_id, key = ?resolved.key, %holder, "admission denied, occupied");
                Admission {
                    decision: AdmissionDecision::deny(robot_id),
                    outcome: AdmissionOutcome::Occupied { holder },
                }
            }
        }
    }

    /// Force-release everything a robot holds (liveness signal).
    pub fn release(&self, robot_id: &str) -> usize {
        self.occupancy.release_robot(robot_id).len()
    }

    fn fail_open(&self, request: &SegmentRequest, requested: f64, reason: &str) -> Admission {
        warn!(
            robot_id = %request.robot_id,
            map_id = request.map_id,
            %reason,
            "admission fail-open"
        );
        Admission {
            decision: AdmissionDecision::allow(&request.robot_id, requested),
            outcome: AdmissionOutcome::FailOpen {
                reason: reason.to_string(),
            },
        }
    }

    /// Map a lookahead onto a claim key.
    fn resolve<'a>(
        &self,
        snapshot: &'a MapSnapshot,
        lookahead: &[Point],
        first: Point,
        last: Point,
    ) -> Option<Resolved<'a>> {
        if !first.is_finite() || !last.is_finite() {
            return None;
        }
        let from = snapshot.nearest_endpoint_on_active_edges(first)?;
        let to = snapshot.nearest_endpoint_on_active_edges(last)?;

        if from == to && self.is_junction_manoeuvre(snapshot, from, lookahead) {
            return Some(Resolved {
                key: OccupancyKey::node(from),
                edge: None,
            });
        }

        if from != to {
            if let Some((edge, direction)) = snapshot.edge_between(from, to) {
                return Some(Resolved {
                    key: OccupancyKey::edge(from, to),
                    edge: Some((edge, direction)),
                });
            }
        }

        // No exact edge: take the edge nearest the middle of the lookahead.
        // Travel runs the way the lookahead advances along it; a lookahead
        // with no progress enters from the end closer to where it starts.
        let middle = lookahead[lookahead.len() / 2];
        let found = snapshot.nearest_edge(middle)?;
        let edge = found.edge;
        let direction = self
            .direction_of_travel(snapshot, edge, first, last)
            .or_else(|| nearer_end_direction(snapshot, edge, first))
            .unwrap_or(TraversalDirection::Forward);
        Some(Resolved {
            key: OccupancyKey::edge(edge.entry_node(direction), edge.exit_node(direction)),
            edge: Some((edge, direction)),
        })
    }

    fn direction_of_travel(
        &self,
        snapshot: &MapSnapshot,
        edge: &Edge,
        first: Point,
        last: Point,
    ) -> Option<TraversalDirection> {
        let polyline = snapshot.edge_polyline(edge)?;
        let from = project_onto_polyline(&polyline, first)?.arc_length;
        let to = project_onto_polyline(&polyline, last)?.arc_length;
        if to - from > ARC_EPSILON {
            Some(TraversalDirection::Forward)
        } else if from - to > ARC_EPSILON {
            Some(TraversalDirection::Reverse)
        } else {
            None
        }
    }

    fn is_junction_manoeuvre(&self, snapshot: &MapSnapshot, node_id: NodeId, lookahead: &[Point]) -> bool {
        let Some(center) = snapshot.node_position(node_id) else {
            return false;
        };
        lookahead
            .iter()
            .all(|p| p.distance(center) <= self.settings.junction_radius)
    }

    /// Distance to the nearest halted robot ahead on `edge`.
    ///
    /// `None` when nothing blocks the way.
    fn nearest_gap_ahead(
        &self,
        snapshot: &MapSnapshot,
        robot_id: &str,
        edge: &Edge,
        direction: TraversalDirection,
        position: Point,
        now: Instant,
    ) -> Option<f64> {
        let polyline = snapshot.edge_polyline(edge)?;
        let own = project_onto_polyline(&polyline, position)?.arc_length;

        self.positions
            .fresh_on_map(snapshot.map_id(), now, self.settings.stale_after)
            .into_iter()
            .filter(|other| other.robot_id != robot_id && other.state.is_stationary())
            .filter_map(|other| {
                let projection = project_onto_polyline(&polyline, other.position?)?;
                if projection.distance > self.settings.lateral_tolerance {
                    return None;
                }
                let gap = match direction {
                    TraversalDirection::Forward => projection.arc_length - own,
                    TraversalDirection::Reverse => own - projection.arc_length,
                };
                (gap >= 0.0).then_some(gap)
            })
            .min_by(f64::total_cmp)
    }

    /// Room left before a robot `gap` ahead, keeping the safety buffer.
    fn ahead_limit(&self, gap: f64) -> f64 {
        if gap <= self.settings.safety_buffer {
            0.0
        } else {
            gap - self.settings.safety_buffer
        }
    }
}

fn nearer_end_direction(snapshot: &MapSnapshot, edge: &Edge, point: Point) -> Option<TraversalDirection> {
    let start = snapshot.node_position(edge.start_node_id)?;
    let end = snapshot.node_position(edge.end_node_id)?;
    Some(if point.distance(end) < point.distance(start) {
        TraversalDirection::Reverse
    } else {
        TraversalDirection::Forward
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{EdgeId, GraphError, GraphFuture, MapGraph, MapId, Node, RobotState, TelemetryUpdate};
    use fleetgrid_state::{MapDocument, StateStore};

    fn node(id: NodeId, x: f64, y: f64) -> Node {
        Node {
            id,
            map_id: 1,
            position: Point::new(x, y),
            active: true,
            maintenance: false,
            junction_speed_limit: None,
        }
    }

    fn edge(id: EdgeId, a: &Node, b: &Node, bidirectional: bool) -> Edge {
        Edge {
            id,
            map_id: 1,
            start_node_id: a.id,
            end_node_id: b.id,
            bidirectional,
            geometry: vec![a.position, b.position],
            length: a.position.distance(b.position),
            active: true,
            maintenance: false,
            speed_limit: None,
            is_rest_path: false,
            rest_capacity: None,
        }
    }

    /// N1(0,0) -- N2(10,0) -- N3(10,10)
    fn arbiter() -> TrafficArbiter {
        let (a, b, c) = (node(1, 0.0, 0.0), node(2, 10.0, 0.0), node(3, 10.0, 10.0));
        let store = StateStore::open_in_memory().unwrap();
        store
            .import_map(&MapDocument {
                edges: vec![edge(10, &a, &b, true), edge(11, &b, &c, false)],
                nodes: vec![a, b, c],
            })
            .unwrap();
        TrafficArbiter::new(
            Arc::new(store),
            Arc::new(OccupancyService::new()),
            Arc::new(LivePositionCache::new()),
            TrafficSettings::default(),
        )
    }

    fn segment(robot: &str, from_x: f64, to_x: f64, length: f64) -> SegmentRequest {
        let steps = ((to_x - from_x).abs() / 0.5).round() as usize;
        let dir = if to_x >= from_x { 1.0 } else { -1.0 };
        SegmentRequest {
            robot_id: robot.to_string(),
            map_id: 1,
            lookahead: (0..=steps)
                .map(|i| Point::new(from_x + dir * 0.5 * i as f64, 0.0))
                .collect(),
            length,
        }
    }

    fn park(arbiter: &TrafficArbiter, robot: &str, x: f64, y: f64, state: RobotState, now: Instant) {
        let positions = arbiter.positions();
        positions.apply_at(
            &TelemetryUpdate::Pose {
                robot_id: robot.to_string(),
                map_id: Some(1),
                x,
                y,
                timestamp: 1.0,
            },
            now,
        );
        positions.apply_at(
            &TelemetryUpdate::Status {
                robot_id: robot.to_string(),
                state,
                timestamp: 1.0,
            },
            now,
        );
    }

    #[tokio::test]
    async fn limit_stops_short_of_idle_robot_ahead() {
        let arbiter = arbiter();
        let now = Instant::now();
        park(&arbiter, "r1", 3.0, 0.0, RobotState::Idle, now);
        let admission = arbiter.admit_at(&segment("r2", 0.0, 5.0, 5.0), now).await;
        assert!(admission.decision.allow);
        assert_eq!(admission.decision.limit_meters, Some(2.0));
        assert_eq!(
            arbiter.occupancy().holder(1, &OccupancyKey::edge(1, 2)).as_deref(),
            Some("r2")
        );
    }

    #[tokio::test]
    async fn idle_robot_within_buffer_denies() {
        let arbiter = arbiter();
        let now = Instant::now();
        park(&arbiter, "r1", 0.5, 0.0, RobotState::Idle, now);
        let admission = arbiter.admit_at(&segment("r2", 0.0, 5.0, 5.0), now).await;
        assert!(!admission.decision.allow);
        assert_eq!(admission.decision.limit_meters, None);
        assert!(matches!(admission.outcome, AdmissionOutcome::Blocked { .. }));
        // A denial claims nothing.
        assert!(arbiter.occupancy().held_by("r2").is_none());
    }

    #[tokio::test]
    async fn moving_stale_behind_or_off_centre_robots_do_not_block() {
        let arbiter = arbiter();
        let t0 = Instant::now();
        park(&arbiter, "moving", 2.0, 0.0, RobotState::Moving, t0);
        park(&arbiter, "aside", 2.0, 0.5, RobotState::Idle, t0);
        park(&arbiter, "behind", 0.0, 0.0, RobotState::Stopped, t0);
        park(&arbiter, "old", 1.5, 0.0, RobotState::Idle, t0 - Duration::from_secs(6));
        let admission = arbiter.admit_at(&segment("r2", 0.5, 5.5, 5.0), t0).await;
        assert_eq!(admission.decision, AdmissionDecision::allow("r2", 5.0));
    }

    #[tokio::test]
    async fn reverse_traversal_looks_the_other_way() {
        let arbiter = arbiter();
        let now = Instant::now();
        // Robot ahead when driving from N2 towards N1.
        park(&arbiter, "r1", 6.0, 0.0, RobotState::Stopped, now);
        let admission = arbiter.admit_at(&segment("r2", 10.0, 5.0, 5.0), now).await;
        assert_eq!(admission.decision.limit_meters, Some(3.0));
        assert_eq!(
            admission.outcome,
            AdmissionOutcome::Granted {
                key: OccupancyKey::edge(2, 1)
            }
        );
    }

    #[tokio::test]
    async fn mid_edge_travel_follows_lookahead_progress() {
        let arbiter = arbiter();
        let now = Instant::now();
        park(&arbiter, "r1", 8.0, 0.0, RobotState::Idle, now);
        // Both ends anchor to N2; the robot is heading towards it.
        let admission = arbiter.admit_at(&segment("r2", 6.0, 9.0, 3.0), now).await;
        assert_eq!(admission.decision.limit_meters, Some(1.0));
        assert_eq!(
            admission.outcome,
            AdmissionOutcome::Granted {
                key: OccupancyKey::edge(1, 2)
            }
        );

        // A second robot heading the same way finds the edge taken.
        let follower = arbiter.admit_at(&segment("r3", 5.5, 9.5, 3.0), now).await;
        assert_eq!(
            follower.outcome,
            AdmissionOutcome::Occupied {
                holder: "r2".to_string()
            }
        );
    }

    #[tokio::test]
    async fn mid_edge_travel_away_from_the_nearer_node() {
        let arbiter = arbiter();
        let now = Instant::now();
        park(&arbiter, "r1", 6.0, 0.0, RobotState::Stopped, now);
        let admission = arbiter.admit_at(&segment("r2", 9.0, 7.0, 3.0), now).await;
        assert_eq!(admission.decision.limit_meters, Some(2.0));
        assert_eq!(
            admission.outcome,
            AdmissionOutcome::Granted {
                key: OccupancyKey::edge(2, 1)
            }
        );
    }

    #[tokio::test]
    async fn blocked_outcome_reports_distance_to_robot_ahead() {
        let arbiter = arbiter();
        let now = Instant::now();
        park(&arbiter, "r1", 0.75, 0.0, RobotState::Idle, now);
        let admission = arbiter.admit_at(&segment("r2", 0.0, 5.0, 5.0), now).await;
        assert!(!admission.decision.allow);
        assert_eq!(admission.outcome, AdmissionOutcome::Blocked { gap: 0.75 });
    }

    #[tokio::test]
    async fn held_edge_is_denied_to_others() {
        let arbiter = arbiter();
        let now = Instant::now();
        assert!(arbiter.admit_at(&segment("r1", 0.0, 10.0, 3.0), now).await.decision.allow);
        let second = arbiter.admit_at(&segment("r2", 0.0, 10.0, 3.0), now).await;
        assert_eq!(
            second.outcome,
            AdmissionOutcome::Occupied {
                holder: "r1".to_string()
            }
        );
        // After release the edge is free again.
        assert_eq!(arbiter.release("r1"), 1);
        assert!(arbiter.admit_at(&segment("r2", 0.0, 10.0, 3.0), now).await.decision.allow);
    }

    #[tokio::test]
    async fn next_grant_releases_previous_edge() {
        let arbiter = arbiter();
        let now = Instant::now();
        arbiter.admit_at(&segment("r1", 0.0, 10.0, 3.0), now).await;
        let turn = SegmentRequest {
            robot_id: "r1".to_string(),
            map_id: 1,
            lookahead: vec![Point::new(10.0, 0.0), Point::new(10.0, 5.0), Point::new(10.0, 10.0)],
            length: 10.0,
        };
        let admission = arbiter.admit_at(&turn, now).await;
        assert_eq!(
            admission.outcome,
            AdmissionOutcome::Granted {
                key: OccupancyKey::edge(2, 3)
            }
        );
        assert!(arbiter.occupancy().holder(1, &OccupancyKey::edge(1, 2)).is_none());
    }

    #[tokio::test]
    async fn tight_turn_claims_the_junction_node() {
        let arbiter = arbiter();
        let now = Instant::now();
        let request = SegmentRequest {
            robot_id: "r1".to_string(),
            map_id: 1,
            lookahead: vec![Point::new(9.8, 0.0), Point::new(10.0, 0.0), Point::new(10.0, 0.2)],
            length: 0.4,
        };
        let admission = arbiter.admit_at(&request, now).await;
        assert_eq!(
            admission.outcome,
            AdmissionOutcome::Granted {
                key: OccupancyKey::node(2)
            }
        );
    }

    #[tokio::test]
    async fn unresolvable_segment_fails_open() {
        let store = StateStore::open_in_memory().unwrap();
        let arbiter = TrafficArbiter::new(
            Arc::new(store),
            Arc::new(OccupancyService::new()),
            Arc::new(LivePositionCache::new()),
            TrafficSettings::default(),
        );
        let admission = arbiter.admit(&segment("r1", 0.0, 5.0, 5.0)).await;
        assert_eq!(admission.decision, AdmissionDecision::allow("r1", 5.0));
        assert!(matches!(admission.outcome, AdmissionOutcome::FailOpen { .. }));
        assert!(arbiter.occupancy().counts().is_empty());

        let empty = SegmentRequest {
            robot_id: "r1".to_string(),
            map_id: 1,
            lookahead: vec![],
            length: 2.5,
        };
        assert_eq!(arbiter.admit(&empty).await.decision, AdmissionDecision::allow("r1", 2.5));
    }

    struct Hanging;

    impl MapGraph for Hanging {
        fn active_edges(&self, _map_id: MapId) -> GraphFuture<'_, Vec<Edge>> {
            Box::pin(std::future::pending())
        }
        fn nodes(&self, _map_id: MapId) -> GraphFuture<'_, Vec<Node>> {
            Box::pin(std::future::pending())
        }
        fn node(&self, _node_id: NodeId) -> GraphFuture<'_, Option<Node>> {
            Box::pin(async { Err(GraphError::Unavailable("hang".to_string())) })
        }
        fn edge(&self, _edge_id: EdgeId) -> GraphFuture<'_, Option<Edge>> {
            Box::pin(async { Err(GraphError::Unavailable("hang".to_string())) })
        }
    }

    #[tokio::test]
    async fn graph_timeout_fails_open_without_claiming() {
        let arbiter = TrafficArbiter::new(
            Arc::new(Hanging),
            Arc::new(OccupancyService::new()),
            Arc::new(LivePositionCache::new()),
            TrafficSettings {
                graph_timeout: Duration::from_millis(20),
                ..TrafficSettings::default()
            },
        );
        let admission = arbiter.admit(&segment("r1", 0.0, 5.0, 5.0)).await;
        assert!(admission.decision.allow);
        assert!(arbiter.occupancy().held_by("r1").is_none());
    }

    #[tokio::test]
    async fn concurrent_admissions_keep_edges_exclusive() {
        let arbiter = Arc::new(arbiter());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let arbiter = arbiter.clone();
                tokio::spawn(async move {
                    let robot = format!("r{i}");
                    let request = if i % 2 == 0 {
                        segment(&robot, 0.0, 10.0, 3.0)
                    } else {
                        segment(&robot, 10.0, 0.0, 3.0)
                    };
                    arbiter.admit(&request).await
                })
            })
            .collect();
        let mut granted = Vec::new();
        for h in handles {
            if let AdmissionOutcome::Granted { key } = h.await.unwrap().outcome {
                granted.push(key);
            }
        }
        granted.sort_by_key(|k| format!("{k:?}"));
        let before = granted.len();
        granted.dedup();
        assert_eq!(before, granted.len(), "a key was granted twice");
        assert_eq!(granted.len(), 2);
    }
}
