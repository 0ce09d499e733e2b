//! Shortest-path search over the routable subgraph of one map.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use fleet_core::{EdgeId, NodeId, TraversalDirection};
use fleetgrid_geometry::{MapSnapshot, effective_length};

/// One directed hop of the adjacency list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hop {
    pub to: usize,
    pub edge_id: EdgeId,
    pub direction: TraversalDirection,
    pub weight: f64,
}

/// A traversed edge of a found path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathHop {
    pub edge_id: EdgeId,
    pub direction: TraversalDirection,
}

/// Result of a search.
#[derive(Debug, Clone, PartialEq)]
pub struct ShortestPath {
    pub node_ids: Vec<NodeId>,
    pub hops: Vec<PathHop>,
    /// Sum of the weights of `hops`.
    pub length: f64,
}

impl ShortestPath {
    /// The zero-edge path of a start that is also the goal.
    pub fn trivial(node: NodeId) -> Self {
        Self {
            node_ids: vec![node],
            hops: Vec::new(),
            length: 0.0,
        }
    }
}

/// Weighted directed adjacency list.
///
/// Bidirectional edges contribute a hop in each direction, one-way edges
/// only their declared one.
#[derive(Debug, Clone, Default)]
pub struct SearchGraph {
    ids: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    adjacency: Vec<Vec<Hop>>,
}

impl SearchGraph {
    pub fn from_snapshot(snapshot: &MapSnapshot) -> Self {
        let mut graph = Self::default();
        for edge in snapshot.routable_edges() {
            let weight = effective_length(edge);
            let (start, end) = (
                graph.intern(edge.start_node_id),
                graph.intern(edge.end_node_id),
            );
            graph.adjacency[start].push(Hop {
                to: end,
                edge_id: edge.id,
                direction: TraversalDirection::Forward,
                weight,
            });
            if edge.bidirectional {
                graph.adjacency[end].push(Hop {
                    to: start,
                    edge_id: edge.id,
                    direction: TraversalDirection::Reverse,
                    weight,
                });
            }
        }
        graph
    }

    fn intern(&mut self, id: NodeId) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.ids.len();
        self.ids.push(id);
        self.index.insert(id, idx);
        self.adjacency.push(Vec::new());
        idx
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Dijkstra from `from` to `to`.
    ///
    /// A strictly shorter tentative distance always replaces the recorded
    /// predecessor; equal distances keep the first one found.
    pub fn shortest_path(&self, from: NodeId, to: NodeId) -> Option<ShortestPath> {
        if from == to {
            return Some(ShortestPath::trivial(from));
        }
        let start = *self.index.get(&from)?;
        let goal = *self.index.get(&to)?;

        let n = self.ids.len();
        let mut dist = vec![f64::INFINITY; n];
        let mut prev: Vec<Option<(usize, Hop)>> = vec![None; n];
        dist[start] = 0.0;

        let mut heap = BinaryHeap::new();
        heap.push(QueueEntry {
            cost: 0.0,
            node: start,
        });

        while let Some(QueueEntry { cost, node }) = heap.pop() {
            if cost > dist[node] {
                continue;
            }
            if node == goal {
                break;
            }
            for hop in &self.adjacency[node] {
                let candidate = cost + hop.weight;
                if candidate < dist[hop.to] {
                    dist[hop.to] = candidate;
                    prev[hop.to] = Some((node, *hop));
                    heap.push(QueueEntry {
                        cost: candidate,
                        node: hop.to,
                    });
                }
            }
        }

        if !dist[goal].is_finite() {
            return None;
        }

        let mut nodes = vec![goal];
        let mut hops = Vec::new();
        let mut current = goal;
        while current != start {
            let (before, hop) = prev[current]?;
            hops.push(PathHop {
                edge_id: hop.edge_id,
                direction: hop.direction,
            });
            nodes.push(before);
            current = before;
        }
        nodes.reverse();
        hops.reverse();

        Some(ShortestPath {
            node_ids: nodes.into_iter().map(|i| self.ids[i]).collect(),
            hops,
            length: dist[goal],
        })
    }
}

/// Min-heap entry (BinaryHeap is a max-heap, so the ordering is reversed).
#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    cost: f64,
    node: usize,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{Edge, Node, Point};
    use proptest::prelude::*;

    fn node(id: NodeId) -> Node {
        Node {
            id,
            map_id: 1,
            position: Point::new(id as f64, 0.0),
            active: true,
            maintenance: false,
            junction_speed_limit: None,
        }
    }

    fn edge(id: EdgeId, start: NodeId, end: NodeId, length: f64, bidirectional: bool) -> Edge {
        Edge {
            id,
            map_id: 1,
            start_node_id: start,
            end_node_id: end,
            bidirectional,
            geometry: vec![Point::new(start as f64, 0.0), Point::new(end as f64, 0.0)],
            length,
            active: true,
            maintenance: false,
            speed_limit: None,
            is_rest_path: false,
            rest_capacity: None,
        }
    }

    fn graph(node_count: i64, edges: Vec<Edge>) -> SearchGraph {
        let nodes = (0..node_count).map(node).collect();
        SearchGraph::from_snapshot(&MapSnapshot::new(1, nodes, edges))
    }

    #[test]
    fn picks_cheaper_detour() {
        // 0 -> 1 direct costs 10; 0 -> 2 -> 1 costs 3.
        let g = graph(
            3,
            vec![edge(1, 0, 1, 10.0, true), edge(2, 0, 2, 1.0, true), edge(3, 2, 1, 2.0, true)],
        );
        let path = g.shortest_path(0, 1).unwrap();
        assert_eq!(path.node_ids, vec![0, 2, 1]);
        assert_eq!(path.hops.iter().map(|h| h.edge_id).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(path.length, 3.0);
    }

    #[test]
    fn one_way_edge_is_not_walked_backwards() {
        let g = graph(2, vec![edge(1, 0, 1, 1.0, false)]);
        assert!(g.shortest_path(0, 1).is_some());
        assert!(g.shortest_path(1, 0).is_none());
    }

    #[test]
    fn reverse_traversal_is_recorded() {
        let g = graph(2, vec![edge(1, 0, 1, 4.0, true)]);
        let path = g.shortest_path(1, 0).unwrap();
        assert_eq!(path.hops[0].direction, TraversalDirection::Reverse);
    }

    #[test]
    fn same_start_and_goal_is_trivial() {
        let g = graph(1, vec![]);
        let path = g.shortest_path(0, 0).unwrap();
        assert_eq!(path.node_ids, vec![0]);
        assert!(path.hops.is_empty());
        assert_eq!(path.length, 0.0);
    }

    #[test]
    fn unknown_or_disconnected_nodes_have_no_path() {
        let g = graph(4, vec![edge(1, 0, 1, 1.0, true), edge(2, 2, 3, 1.0, true)]);
        assert!(g.shortest_path(0, 3).is_none());
        assert!(g.shortest_path(0, 42).is_none());
    }

    #[test]
    fn inactive_edges_are_excluded() {
        let mut closed = edge(1, 0, 1, 1.0, true);
        closed.maintenance = true;
        let g = graph(3, vec![closed, edge(2, 0, 2, 5.0, true), edge(3, 2, 1, 5.0, true)]);
        assert_eq!(g.shortest_path(0, 1).unwrap().length, 10.0);
    }

    /// Reference single-source distances by Bellman-Ford.
    fn bellman_ford(n: usize, arcs: &[(usize, usize, f64)], source: usize) -> Vec<f64> {
        let mut dist = vec![f64::INFINITY; n];
        dist[source] = 0.0;
        for _ in 0..n {
            for &(u, v, w) in arcs {
                if dist[u] + w < dist[v] {
                    dist[v] = dist[u] + w;
                }
            }
        }
        dist
    }

    proptest! {
        #[test]
        fn matches_bellman_ford(
            n in 2usize..9,
            raw in proptest::collection::vec((0usize..9, 0usize..9, 1u32..50, any::<bool>()), 0..24),
            goal in 0usize..9,
        ) {
            let goal = goal % n;
            let edges: Vec<Edge> = raw
                .iter()
                .enumerate()
                .filter(|(_, (u, v, _, _))| u % n != v % n)
                .map(|(i, &(u, v, w, bi))| edge(i as EdgeId, (u % n) as NodeId, (v % n) as NodeId, w as f64, bi))
                .collect();
            let mut arcs = Vec::new();
            for e in &edges {
                arcs.push((e.start_node_id as usize, e.end_node_id as usize, e.length));
                if e.bidirectional {
                    arcs.push((e.end_node_id as usize, e.start_node_id as usize, e.length));
                }
            }
            let reference = bellman_ford(n, &arcs, 0);
            let g = graph(n as i64, edges.clone());
            match g.shortest_path(0, goal as NodeId) {
                Some(path) => {
                    prop_assert!((path.length - reference[goal]).abs() < 1e-9);
                    // The reported hops really add up to the reported length.
                    let walked: f64 = path
                        .hops
                        .iter()
                        .map(|h| edges.iter().find(|e| e.id == h.edge_id).map(|e| e.length).unwrap_or(f64::NAN))
                        .sum();
                    prop_assert!((walked - path.length).abs() < 1e-9);
                }
                None => prop_assert!(reference[goal].is_infinite()),
            }
        }
    }
}
