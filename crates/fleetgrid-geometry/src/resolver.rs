//! Anchoring positions onto the map graph.
//!
//! A [`MapSnapshot`] is an immutable copy of one map's nodes and active
//! edges, built once per request from the graph query interface. All
//! lookups are pure; ties are broken by the lower id so results do not
//! depend on hash-map iteration order.

use std::borrow::Cow;
use std::collections::HashMap;

use fleet_core::{Edge, EdgeId, MapId, Node, NodeId, Point, TraversalDirection};

use crate::polyline::{Projection, polyline_length, project_onto_polyline};

/// The nearest routable edge to a query point.
#[derive(Debug, Clone)]
pub struct EdgeMatch<'a> {
    pub edge: &'a Edge,
    /// Projection of the query point onto the edge's polyline.
    pub projection: Projection,
}

/// Immutable view of one map's graph.
#[derive(Debug, Clone, Default)]
pub struct MapSnapshot {
    map_id: MapId,
    nodes: HashMap<NodeId, Node>,
    edges: Vec<Edge>,
}

impl MapSnapshot {
    /// Build a snapshot; nodes and edges of other maps are dropped.
    pub fn new(map_id: MapId, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let nodes: HashMap<NodeId, Node> = nodes
            .into_iter()
            .filter(|n| n.map_id == map_id)
            .map(|n| (n.id, n))
            .collect();
        let mut edges: Vec<Edge> = edges.into_iter().filter(|e| e.map_id == map_id).collect();
        edges.sort_by_key(|e| e.id);
        Self { map_id, nodes, edges }
    }

    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edges that may be routed over and granted.
    ///
    /// An edge qualifies when it is active, not under maintenance, and none
    /// of its known end nodes is inactive or under maintenance.
    pub fn routable_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| self.is_routable(e))
    }

    pub fn is_routable(&self, edge: &Edge) -> bool {
        edge.is_traversable()
            && [edge.start_node_id, edge.end_node_id]
                .iter()
                .all(|id| self.nodes.get(id).is_none_or(Node::is_usable))
    }

    /// Position of a node, falling back to the matching end of any edge
    /// geometry that references it.
    pub fn node_position(&self, id: NodeId) -> Option<Point> {
        if let Some(node) = self.nodes.get(&id) {
            return Some(node.position);
        }
        self.edges.iter().find_map(|e| {
            if e.start_node_id == id {
                e.geometry.first().copied()
            } else if e.end_node_id == id {
                e.geometry.last().copied()
            } else {
                None
            }
        })
    }

    /// Polyline of an edge from its start node to its end node.
    ///
    /// Edges with fewer than two geometry points fall back to the straight
    /// line between their end nodes.
    pub fn edge_polyline<'a>(&self, edge: &'a Edge) -> Option<Cow<'a, [Point]>> {
        if edge.geometry.len() >= 2 {
            return Some(Cow::Borrowed(edge.geometry.as_slice()));
        }
        let start = self.node_position(edge.start_node_id)?;
        let end = self.node_position(edge.end_node_id)?;
        Some(Cow::Owned(vec![start, end]))
    }

    /// Euclidean nearest node of the map, or `None` if it has no nodes.
    pub fn nearest_node(&self, point: Point) -> Option<&Node> {
        self.nodes.values().min_by(|a, b| {
            a.position
                .distance(point)
                .total_cmp(&b.position.distance(point))
                .then(a.id.cmp(&b.id))
        })
    }

    /// Nearest routable edge by point-to-segment distance.
    pub fn nearest_edge(&self, point: Point) -> Option<EdgeMatch<'_>> {
        let mut best: Option<EdgeMatch<'_>> = None;
        for edge in self.routable_edges() {
            let Some(polyline) = self.edge_polyline(edge) else {
                continue;
            };
            let Some(projection) = project_onto_polyline(&polyline, point) else {
                continue;
            };
            // Edges are visited in id order, so strict `<` keeps the lower id on ties.
            if best
                .as_ref()
                .is_none_or(|b| projection.distance < b.projection.distance)
            {
                best = Some(EdgeMatch { edge, projection });
            }
        }
        best
    }

    /// Anchor a position onto the graph.
    ///
    /// Picks the nearest routable edge, then whichever of its end nodes is
    /// closer to `point`. Falls back to [`Self::nearest_node`] when the map
    /// has no routable edges.
    pub fn nearest_endpoint_on_active_edges(&self, point: Point) -> Option<NodeId> {
        let Some(found) = self.nearest_edge(point) else {
            return self.nearest_node(point).map(|n| n.id);
        };
        let edge = found.edge;
        let start = self.node_position(edge.start_node_id);
        let end = self.node_position(edge.end_node_id);
        match (start, end) {
            (Some(s), Some(e)) => {
                if point.distance(e) < point.distance(s) {
                    Some(edge.end_node_id)
                } else {
                    Some(edge.start_node_id)
                }
            }
            (Some(_), None) => Some(edge.start_node_id),
            (None, Some(_)) => Some(edge.end_node_id),
            (None, None) => self.nearest_node(point).map(|n| n.id),
        }
    }

    /// Routable edge connecting `from` to `to` in that direction.
    ///
    /// One-way edges only match their declared direction; bidirectional
    /// edges also match in reverse. Parallel candidates resolve to the
    /// shortest, then the lowest id.
    pub fn edge_between(&self, from: NodeId, to: NodeId) -> Option<(&Edge, TraversalDirection)> {
        self.routable_edges()
            .filter_map(|e| e.direction_between(from, to).map(|d| (e, d)))
            .min_by(|(a, _), (b, _)| {
                effective_length(a)
                    .total_cmp(&effective_length(b))
                    .then(a.id.cmp(&b.id))
            })
    }
}

/// Search weight of an edge: its declared length, or the geometry length
/// when the declared one is missing or invalid.
pub fn effective_length(edge: &Edge) -> f64 {
    if edge.length.is_finite() && edge.length > 0.0 {
        edge.length
    } else {
        polyline_length(&edge.geometry)
    }
}
