//! RoutePlanner — from a route request to a published-ready plan.
//!
//! Phases: `Requested → Resolved → Searched → Sampled`; the caller moves the
//! plan to `Published`. Failures stop at the phase that produced them and
//! are reported, never retried here.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use fleet_core::config::{ConfigError, PlannerConfig};
use fleet_core::graph::fetch_map;
use fleet_core::{GraphResult, MapGraph, MapId, NodeId, Point, RoutePlan, RouteRequest};
use fleetgrid_geometry::{DEFAULT_SAMPLE_STEP, MapSnapshot, effective_length};

use crate::dijkstra::{PathHop, SearchGraph, ShortestPath};
use crate::error::{PlannerError, PlannerResult};
use crate::sampler::sample_route;

/// Progress of one planning request, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanPhase {
    Requested,
    Resolved,
    Searched,
    Sampled,
    Published,
}

impl fmt::Display for PlanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanPhase::Requested => "requested",
            PlanPhase::Resolved => "resolved",
            PlanPhase::Searched => "searched",
            PlanPhase::Sampled => "sampled",
            PlanPhase::Published => "published",
        };
        f.write_str(s)
    }
}

/// Boxed future returned by [`PathService`].
pub type PathFuture<'a> = Pin<Box<dyn Future<Output = GraphResult<Option<Vec<NodeId>>>> + Send + 'a>>;

/// External shortest-path service (e.g. a graph database).
///
/// When configured, its answer is preferred over the in-process search as
/// long as every hop maps to a routable edge in the right direction.
pub trait PathService: Send + Sync {
    fn shortest_path(&self, map_id: MapId, from: NodeId, to: NodeId) -> PathFuture<'_>;
}

/// Planner tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerSettings {
    pub sample_step: f64,
    pub default_speed: f64,
    pub graph_timeout: Duration,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            sample_step: DEFAULT_SAMPLE_STEP,
            default_speed: 1.0,
            graph_timeout: Duration::from_secs(2),
        }
    }
}

impl PlannerSettings {
    pub fn from_config(config: &PlannerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            sample_step: config.sample_step,
            default_speed: config.default_speed,
            graph_timeout: config.graph_timeout()?,
        })
    }
}

/// Computes routes over a map graph.
pub struct RoutePlanner {
    graph: Arc<dyn MapGraph>,
    path_service: Option<Arc<dyn PathService>>,
    settings: PlannerSettings,
}

impl RoutePlanner {
    pub fn new(graph: Arc<dyn MapGraph>, settings: PlannerSettings) -> Self {
        Self {
            graph,
            path_service: None,
            settings,
        }
    }

    /// Prefer an external path service, falling back to Dijkstra.
    pub fn with_path_service(mut self, service: Arc<dyn PathService>) -> Self {
        self.path_service = Some(service);
        self
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Plan a route for one request.
    pub async fn plan(&self, request: &RouteRequest) -> PlannerResult<RoutePlan> {
        let robot_id = request.robot_id.as_str();
        let map_id = request.map_id;
        debug!(%robot_id, map_id, phase = %PlanPhase::Requested, "planning route");

        let (nodes, edges) = fetch_map(self.graph.as_ref(), map_id, self.settings.graph_timeout).await?;
        let snapshot = MapSnapshot::new(map_id, nodes, edges);

        let start = anchor(&snapshot, request.current)?;
        let goal = anchor(&snapshot, request.destination)?;
        debug!(%robot_id, map_id, start, goal, phase = %PlanPhase::Resolved, "anchors resolved");

        let path = self.search(&snapshot, start, goal).await?;
        debug!(
            %robot_id,
            map_id,
            hops = path.hops.len(),
            length = path.length,
            phase = %PlanPhase::Searched,
            "path found"
        );

        let waypoints = sample_route(
            &snapshot,
            &path,
            request.current,
            request.destination,
            self.settings.sample_step,
        );
        let recommended_speed = recommended_speed(&snapshot, &path, self.settings.default_speed);
        info!(
            %robot_id,
            map_id,
            waypoints = waypoints.len(),
            total_length = path.length,
            phase = %PlanPhase::Sampled,
            "route planned"
        );

        Ok(RoutePlan {
            robot_id: request.robot_id.clone(),
            map_id,
            node_ids: path.node_ids,
            path_ids: path.hops.iter().map(|h| h.edge_id).collect(),
            waypoints,
            total_length: path.length,
            recommended_speed,
        })
    }

    async fn search(&self, snapshot: &MapSnapshot, start: NodeId, goal: NodeId) -> PlannerResult<ShortestPath> {
        if let Some(external) = self.external_path(snapshot, start, goal).await {
            return Ok(external);
        }
        SearchGraph::from_snapshot(snapshot)
            .shortest_path(start, goal)
            .ok_or(PlannerError::NoPath { from: start, to: goal })
    }

    /// Ask the external service, if any. `None` means "use Dijkstra".
    async fn external_path(&self, snapshot: &MapSnapshot, start: NodeId, goal: NodeId) -> Option<ShortestPath> {
        let service = self.path_service.as_ref()?;
        let map_id = snapshot.map_id();
        let answer = tokio::time::timeout(
            self.settings.graph_timeout,
            service.shortest_path(map_id, start, goal),
        )
        .await;
        let node_ids = match answer {
            Ok(Ok(Some(ids))) => ids,
            Ok(Ok(None)) => {
                debug!(map_id, start, goal, "path service found no path");
                return None;
            }
            Ok(Err(e)) => {
                warn!(map_id, error = %e, "path service failed, using in-process search");
                return None;
            }
            Err(_) => {
                warn!(map_id, "path service timed out, using in-process search");
                return None;
            }
        };
        match validate_external(snapshot, &node_ids, start, goal) {
            Some(path) => Some(path),
            None => {
                warn!(map_id, ?node_ids, "path service returned an invalid path, ignoring it");
                None
            }
        }
    }
}

fn anchor(snapshot: &MapSnapshot, point: Point) -> PlannerResult<NodeId> {
    let found = if point.is_finite() {
        snapshot.nearest_endpoint_on_active_edges(point)
    } else {
        None
    };
    found.ok_or(PlannerError::NoAnchor {
        map_id: snapshot.map_id(),
        point,
    })
}

/// Accept an externally computed node path only if it is walkable here.
fn validate_external(
    snapshot: &MapSnapshot,
    node_ids: &[NodeId],
    start: NodeId,
    goal: NodeId,
) -> Option<ShortestPath> {
    if node_ids.first() != Some(&start) || node_ids.last() != Some(&goal) {
        return None;
    }
    let mut hops = Vec::with_capacity(node_ids.len().saturating_sub(1));
    let mut length = 0.0;
    for pair in node_ids.windows(2) {
        let (edge, direction) = snapshot.edge_between(pair[0], pair[1])?;
        length += effective_length(edge);
        hops.push(PathHop {
            edge_id: edge.id,
            direction,
        });
    }
    Some(ShortestPath {
        node_ids: node_ids.to_vec(),
        hops,
        length,
    })
}

/// Slowest limit along the path, capped by the configured default.
fn recommended_speed(snapshot: &MapSnapshot, path: &ShortestPath, default_speed: f64) -> f64 {
    let edge_limits = path
        .hops
        .iter()
        .filter_map(|h| snapshot.edge(h.edge_id).and_then(|e| e.speed_limit));
    let junction_limits = path
        .node_ids
        .iter()
        .filter_map(|id| snapshot.node(*id).and_then(|n| n.junction_speed_limit));
    edge_limits
        .chain(junction_limits)
        .filter(|v| v.is_finite() && *v > 0.0)
        .fold(default_speed, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{Edge, EdgeId, GraphError, GraphFuture, Node, RouteFailureReason};
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

    fn planner_for(nodes: Vec<Node>, edges: Vec<Edge>) -> RoutePlanner {
        let store = StateStore::open_in_memory().unwrap();
        store.import_map(&MapDocument { nodes, edges }).unwrap();
        RoutePlanner::new(Arc::new(store), PlannerSettings::default())
    }

    fn request(current: Point, destination: Point) -> RouteRequest {
        RouteRequest {
            robot_id: "r1".to_string(),
            map_id: 1,
            current,
            destination,
        }
    }

    #[tokio::test]
    async fn trivial_route_has_no_waypoints() {
        let planner = planner_for(vec![node(1, 0.0, 0.0)], vec![]);
        let plan = planner
            .plan(&request(Point::new(0.0, 0.0), Point::new(0.0, 0.0)))
            .await
            .unwrap();
        assert_eq!(plan.node_ids, vec![1]);
        assert!(plan.path_ids.is_empty());
        assert!(plan.waypoints.is_empty());
        assert_eq!(plan.total_length, 0.0);
    }

    #[tokio::test]
    async fn straight_line_route() {
        let (n1, n2) = (node(1, 0.0, 0.0), node(2, 10.0, 0.0));
        let planner = planner_for(vec![n1.clone(), n2.clone()], vec![edge(7, &n1, &n2, true)]);
        let plan = planner
            .plan(&request(Point::new(0.0, 0.0), Point::new(10.0, 0.0)))
            .await
            .unwrap();
        assert_eq!(plan.node_ids, vec![1, 2]);
        assert_eq!(plan.path_ids, vec![7]);
        assert_eq!(plan.total_length, 10.0);
        assert_eq!(plan.waypoints.len(), 21);
        for (i, p) in plan.waypoints.iter().enumerate() {
            assert!((p.x - i as f64 * 0.5).abs() < 1e-9);
        }
        assert_eq!(plan.waypoints.last(), Some(&Point::new(10.0, 0.0)));
        assert_eq!(plan.recommended_speed, 1.0);
    }

    #[tokio::test]
    async fn one_way_edge_blocks_reverse_route() {
        let (n1, n2) = (node(1, 0.0, 0.0), node(2, 10.0, 0.0));
        let planner = planner_for(vec![n1.clone(), n2.clone()], vec![edge(7, &n1, &n2, false)]);
        let err = planner
            .plan(&request(Point::new(10.0, 0.0), Point::new(0.0, 0.0)))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), RouteFailureReason::NoPath);
        let failure = err.to_failure(&request(Point::new(10.0, 0.0), Point::new(0.0, 0.0)));
        assert_eq!(failure.robot_id, "r1");
    }

    #[tokio::test]
    async fn detours_around_maintenance_edge() {
        let (a, b, c) = (node(1, 0.0, 0.0), node(2, 10.0, 0.0), node(3, 5.0, 5.0));
        let mut direct = edge(10, &a, &b, true);
        direct.maintenance = true;
        let planner = planner_for(
            vec![a.clone(), b.clone(), c.clone()],
            vec![direct, edge(11, &a, &c, true), edge(12, &c, &b, true)],
        );
        let plan = planner
            .plan(&request(Point::new(0.0, 0.0), Point::new(10.0, 0.0)))
            .await
            .unwrap();
        assert_eq!(plan.path_ids, vec![11, 12]);
        assert!(!plan.path_ids.contains(&10));
    }

    #[tokio::test]
    async fn empty_map_has_no_anchor() {
        let planner = planner_for(vec![], vec![]);
        let err = planner
            .plan(&request(Point::new(0.0, 0.0), Point::new(1.0, 0.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::NoAnchor { .. }));
    }

    #[tokio::test]
    async fn speed_is_capped_by_slowest_limit() {
        let (mut a, b, c) = (node(1, 0.0, 0.0), node(2, 10.0, 0.0), node(3, 20.0, 0.0));
        a.junction_speed_limit = Some(0.8);
        let mut ab = edge(10, &a, &b, true);
        ab.speed_limit = Some(0.6);
        let planner = planner_for(vec![a.clone(), b.clone(), c.clone()], vec![ab, edge(11, &b, &c, true)]);
        let plan = planner
            .plan(&request(Point::new(0.0, 0.0), Point::new(20.0, 0.0)))
            .await
            .unwrap();
        assert_eq!(plan.recommended_speed, 0.6);
    }

    struct FixedPath(Vec<NodeId>);

    impl PathService for FixedPath {
        fn shortest_path(&self, _map_id: MapId, _from: NodeId, _to: NodeId) -> PathFuture<'_> {
            let ids = self.0.clone();
            Box::pin(async move { Ok(Some(ids)) })
        }
    }

    fn triangle() -> (Vec<Node>, Vec<Edge>) {
        let (a, b, c) = (node(1, 0.0, 0.0), node(2, 10.0, 0.0), node(3, 5.0, 5.0));
        let edges = vec![edge(10, &a, &b, true), edge(11, &a, &c, true), edge(12, &c, &b, false)];
        (vec![a, b, c], edges)
    }

    #[tokio::test]
    async fn valid_external_path_is_preferred() {
        let (nodes, edges) = triangle();
        let planner = planner_for(nodes, edges).with_path_service(Arc::new(FixedPath(vec![1, 3, 2])));
        let plan = planner
            .plan(&request(Point::new(0.0, 0.0), Point::new(10.0, 0.0)))
            .await
            .unwrap();
        assert_eq!(plan.path_ids, vec![11, 12]);
    }

    #[tokio::test]
    async fn invalid_external_path_falls_back_to_dijkstra() {
        let (nodes, edges) = triangle();
        // 2 -> 3 would walk the one-way edge 12 backwards.
        let planner = planner_for(nodes, edges).with_path_service(Arc::new(FixedPath(vec![2, 3, 1])));
        let plan = planner
            .plan(&request(Point::new(10.0, 0.0), Point::new(0.0, 0.0)))
            .await
            .unwrap();
        assert_eq!(plan.path_ids, vec![10]);
    }

    struct Offline;

    impl MapGraph for Offline {
        fn active_edges(&self, _map_id: MapId) -> GraphFuture<'_, Vec<Edge>> {
            Box::pin(async { Err(GraphError::Unavailable("down".to_string())) })
        }
        fn nodes(&self, _map_id: MapId) -> GraphFuture<'_, Vec<Node>> {
            Box::pin(async { Err(GraphError::Unavailable("down".to_string())) })
        }
        fn node(&self, _node_id: NodeId) -> GraphFuture<'_, Option<Node>> {
            Box::pin(async { Ok(None) })
        }
        fn edge(&self, _edge_id: EdgeId) -> GraphFuture<'_, Option<Edge>> {
            Box::pin(async { Ok(None) })
        }
    }

    #[tokio::test]
    async fn graph_outage_is_reported() {
        let planner = RoutePlanner::new(Arc::new(Offline), PlannerSettings::default());
        let err = planner
            .plan(&request(Point::new(0.0, 0.0), Point::new(1.0, 0.0)))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), RouteFailureReason::GraphUnavailable);
    }
}
