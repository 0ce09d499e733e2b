//! The store as a map graph source.

use fleet_core::{Edge, EdgeId, GraphError, GraphFuture, MapGraph, MapId, Node, NodeId};

use crate::error::StateError;
use crate::store::StateStore;

fn unavailable(e: StateError) -> GraphError {
    GraphError::Unavailable(e.to_string())
}

impl MapGraph for StateStore {
    fn active_edges(&self, map_id: MapId) -> GraphFuture<'_, Vec<Edge>> {
        Box::pin(async move {
            let edges = self.list_edges(map_id).map_err(unavailable)?;
            Ok(edges.into_iter().filter(Edge::is_traversable).collect())
        })
    }

    fn nodes(&self, map_id: MapId) -> GraphFuture<'_, Vec<Node>> {
        Box::pin(async move { self.list_nodes(map_id).map_err(unavailable) })
    }

    fn node(&self, node_id: NodeId) -> GraphFuture<'_, Option<Node>> {
        Box::pin(async move { self.get_node(node_id).map_err(unavailable) })
    }

    fn edge(&self, edge_id: EdgeId) -> GraphFuture<'_, Option<Edge>> {
        Box::pin(async move { self.get_edge(edge_id).map_err(unavailable) })
    }
}
