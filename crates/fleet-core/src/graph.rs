//! Read-only map graph query interface.
//!
//! The map graph is owned by an external collaborator. Anything that can
//! answer these four queries can back the planner and the arbiter; the
//! redb store in `fleetgrid-state` is the bundled implementation.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::types::{Edge, EdgeId, MapId, Node, NodeId};

/// Errors surfaced by a map graph source.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphError {
    #[error("graph query timed out after {0:?}")]
    Timeout(Duration),

    #[error("graph source unavailable: {0}")]
    Unavailable(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Boxed future returned by [`MapGraph`] queries.
pub type GraphFuture<'a, T> = Pin<Box<dyn Future<Output = GraphResult<T>> + Send + 'a>>;

/// Map graph queries (eventually-consistent reads are acceptable).
pub trait MapGraph: Send + Sync {
    /// Edges of the map that are active and not under maintenance.
    fn active_edges(&self, map_id: MapId) -> GraphFuture<'_, Vec<Edge>>;

    /// All nodes of the map.
    fn nodes(&self, map_id: MapId) -> GraphFuture<'_, Vec<Node>>;

    fn node(&self, node_id: NodeId) -> GraphFuture<'_, Option<Node>>;

    fn edge(&self, edge_id: EdgeId) -> GraphFuture<'_, Option<Edge>>;
}

/// Nodes and active edges of one map, fetched under a single deadline.
pub async fn fetch_map(
    graph: &dyn MapGraph,
    map_id: MapId,
    timeout: Duration,
) -> GraphResult<(Vec<Node>, Vec<Edge>)> {
    let query = async {
        let nodes = graph.nodes(map_id).await?;
        let edges = graph.active_edges(map_id).await?;
        Ok((nodes, edges))
    };
    match tokio::time::timeout(timeout, query).await {
        Ok(result) => result,
        Err(_) => Err(GraphError::Timeout(timeout)),
    }
}
