//! Turn a node path into a dense, walkable waypoint list.

use fleet_core::{Point, TraversalDirection};
use fleetgrid_geometry::{MapSnapshot, polyline_length, project_onto_polyline, sample_polyline};

use crate::dijkstra::ShortestPath;

/// Sample the edges of `path` every `step`.
///
/// The first edge starts at the projection of the robot's actual position
/// and the last edge stops at the projection of the requested destination,
/// so the route neither snaps to the start anchor nor overshoots to the
/// goal anchor. Trivial paths and paths that produce no displacement yield
/// an empty list.
pub fn sample_route(
    snapshot: &MapSnapshot,
    path: &ShortestPath,
    current: Point,
    destination: Point,
    step: f64,
) -> Vec<Point> {
    let mut waypoints: Vec<Point> = Vec::new();
    let last = path.hops.len().saturating_sub(1);

    for (i, hop) in path.hops.iter().enumerate() {
        let Some(edge) = snapshot.edge(hop.edge_id) else {
            continue;
        };
        let Some(polyline) = snapshot.edge_polyline(edge) else {
            continue;
        };
        let total = polyline_length(&polyline);
        let (mut from, mut to) = match hop.direction {
            TraversalDirection::Forward => (0.0, total),
            TraversalDirection::Reverse => (total, 0.0),
        };
        if i == 0 {
            if let Some(p) = project_onto_polyline(&polyline, current) {
                from = p.arc_length;
            }
        }
        if i == last {
            if let Some(p) = project_onto_polyline(&polyline, destination) {
                to = p.arc_length;
            }
        }

        for point in sample_polyline(&polyline, from, to, step) {
            // Consecutive edges share their junction point.
            if waypoints.last().is_some_and(|prev| prev.approx_eq(point)) {
                continue;
            }
            waypoints.push(point);
        }
    }

    if waypoints.len() < 2 {
        waypoints.clear();
    }
    waypoints
}
