//! StateStore — redb-backed persistence for FleetGrid.
//!
//! Holds the map graph (nodes and edges) and the command outbox with its
//! correlation index. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, info};

use fleet_core::{Edge, EdgeId, MapId, Node, NodeId};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(EDGES).map_err(map_err!(Table))?;
        txn.open_table(OUTBOX).map_err(map_err!(Table))?;
        txn.open_table(CORRELATIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node.
    pub fn put_node(&self, node: &Node) -> StateResult<()> {
        let value = serde_json::to_vec(node).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            table
                .insert(node.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(node_id = node.id, map_id = node.map_id, "node stored");
        Ok(())
    }

    /// Get a node by ID.
    pub fn get_node(&self, node_id: NodeId) -> StateResult<Option<Node>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        match table.get(node_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let node: Node =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    /// List the nodes of one map.
    pub fn list_nodes(&self, map_id: MapId) -> StateResult<Vec<Node>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let node: Node =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if node.map_id == map_id {
                results.push(node);
            }
        }
        Ok(results)
    }

    /// Delete a node by ID. Returns true if it existed.
    pub fn delete_node(&self, node_id: NodeId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            existed = table.remove(node_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(node_id, existed, "node deleted");
        Ok(existed)
    }

    // ── Edges ──────────────────────────────────────────────────────

    /// Insert or update an edge.
    pub fn put_edge(&self, edge: &Edge) -> StateResult<()> {
        let value = serde_json::to_vec(edge).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EDGES).map_err(map_err!(Table))?;
            table
                .insert(edge.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(edge_id = edge.id, map_id = edge.map_id, "edge stored");
        Ok(())
    }

    /// Get an edge by ID.
    pub fn get_edge(&self, edge_id: EdgeId) -> StateResult<Option<Edge>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EDGES).map_err(map_err!(Table))?;
        match table.get(edge_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let edge: Edge =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(edge))
            }
            None => Ok(None),
        }
    }

    /// List the edges of one map, active or not.
    pub fn list_edges(&self, map_id: MapId) -> StateResult<Vec<Edge>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EDGES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let edge: Edge =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if edge.map_id == map_id {
                results.push(edge);
            }
        }
        Ok(results)
    }

    /// Delete an edge by ID. Returns true if it existed.
    pub fn delete_edge(&self, edge_id: EdgeId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(EDGES).map_err(map_err!(Table))?;
            existed = table.remove(edge_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(edge_id, existed, "edge deleted");
        Ok(existed)
    }

    /// Import a whole map document in one transaction.
    ///
    /// Every edge must reference nodes present in the document or already
    /// stored, and its geometry must start and end on those nodes. Nothing
    /// is written if any edge fails the check.
    pub fn import_map(&self, doc: &MapDocument) -> StateResult<ImportSummary> {
        let mut known: HashMap<NodeId, Node> = HashMap::new();
        for node in &doc.nodes {
            if !node.position.is_finite() {
                return Err(StateError::InvalidMap(format!(
                    "node {} has a non-finite position",
                    node.id
                )));
            }
            known.insert(node.id, node.clone());
        }
        for edge in &doc.edges {
            let start = self.lookup_node(&known, edge.start_node_id)?;
            let end = self.lookup_node(&known, edge.end_node_id)?;
            edge.check_topology(&start, &end)
                .map_err(StateError::InvalidMap)?;
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
            for node in &doc.nodes {
                let value = serde_json::to_vec(node).map_err(map_err!(Serialize))?;
                nodes
                    .insert(node.id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            let mut edges = txn.open_table(EDGES).map_err(map_err!(Table))?;
            for edge in &doc.edges {
                let value = serde_json::to_vec(edge).map_err(map_err!(Serialize))?;
                edges
                    .insert(edge.id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;

        let summary = ImportSummary {
            nodes: doc.nodes.len(),
            edges: doc.edges.len(),
        };
        info!(nodes = summary.nodes, edges = summary.edges, "map imported");
        Ok(summary)
    }

    fn lookup_node(&self, known: &HashMap<NodeId, Node>, id: NodeId) -> StateResult<Node> {
        if let Some(node) = known.get(&id) {
            return Ok(node.clone());
        }
        self.get_node(id)?
            .ok_or_else(|| StateError::InvalidMap(format!("edge references unknown node {id}")))
    }

    // ── Command outbox ─────────────────────────────────────────────

    /// Insert a new outbox entry and index its correlation id.
    pub fn insert_outbox(&self, entry: &OutboxEntry) -> StateResult<()> {
        let value = serde_json::to_vec(entry).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut outbox = txn.open_table(OUTBOX).map_err(map_err!(Table))?;
            outbox
                .insert(entry.outbox_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            if entry.status == OutboxStatus::Pending {
                let mut index = txn.open_table(CORRELATIONS).map_err(map_err!(Table))?;
                index
                    .insert(entry.correlation_id.as_str(), entry.outbox_id.as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(outbox_id = %entry.outbox_id, correlation_id = %entry.correlation_id, "outbox entry stored");
        Ok(())
    }

    /// Get an outbox entry by its outbox id.
    pub fn get_outbox(&self, outbox_id: &str) -> StateResult<Option<OutboxEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OUTBOX).map_err(map_err!(Table))?;
        match table.get(outbox_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let entry: OutboxEntry =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// List outbox entries, optionally filtered by status.
    pub fn list_outbox(&self, status: Option<OutboxStatus>) -> StateResult<Vec<OutboxEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OUTBOX).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let entry: OutboxEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if status.is_none_or(|s| entry.status == s) {
                results.push(entry);
            }
        }
        Ok(results)
    }

    /// Flag a dead-lettered entry as reported. Returns `false` when the
    /// entry is missing or not dead-lettered.
    pub fn mark_dead_letter_published(&self, outbox_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let marked;
        {
            let mut outbox = txn.open_table(OUTBOX).map_err(map_err!(Table))?;
            let stored = outbox
                .get(outbox_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let entry = match stored {
                Some(bytes) => {
                    let entry: OutboxEntry =
                        serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                    Some(entry)
                }
                None => None,
            };
            marked = match entry {
                Some(mut entry) if entry.status == OutboxStatus::DeadLetter => {
                    entry.dead_letter_published = true;
                    let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
                    outbox
                        .insert(outbox_id, value.as_slice())
                        .map_err(map_err!(Write))?;
                    true
                }
                _ => false,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(marked)
    }

    /// Apply `update` to the pending entry currently correlated with
    /// `correlation_id`, inside a single write transaction.
    ///
    /// The correlation index follows the mutation: a changed correlation id
    /// replaces the old row, a terminal status removes it. Returns `None`
    /// when no pending entry carries that correlation id. redb serializes
    /// write transactions, so duplicate deliveries of the same ack observe
    /// each other's effects.
    pub fn update_outbox_by_correlation<R>(
        &self,
        correlation_id: &str,
        update: impl FnOnce(&mut OutboxEntry) -> R,
    ) -> StateResult<Option<(OutboxEntry, R)>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result;
        {
            let mut index = txn.open_table(CORRELATIONS).map_err(map_err!(Table))?;
            let mut outbox = txn.open_table(OUTBOX).map_err(map_err!(Table))?;

            let outbox_id = index
                .get(correlation_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string());
            let Some(outbox_id) = outbox_id else {
                return Ok(None);
            };
            let stored = outbox
                .get(outbox_id.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let Some(stored) = stored else {
                // Dangling index row; drop it so the miss is not repeated.
                index.remove(correlation_id).map_err(map_err!(Write))?;
                drop(index);
                drop(outbox);
                txn.commit().map_err(map_err!(Transaction))?;
                return Ok(None);
            };
            let mut entry: OutboxEntry =
                serde_json::from_slice(&stored).map_err(map_err!(Deserialize))?;

            let output = update(&mut entry);

            if entry.correlation_id != correlation_id || entry.status.is_terminal() {
                index.remove(correlation_id).map_err(map_err!(Write))?;
            }
            if !entry.status.is_terminal() {
                index
                    .insert(entry.correlation_id.as_str(), entry.outbox_id.as_str())
                    .map_err(map_err!(Write))?;
            }
            let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
            outbox
                .insert(entry.outbox_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            result = Some((entry, output));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::Point;

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

    fn edge(id: EdgeId, start: &Node, end: &Node) -> Edge {
        Edge {
            id,
            map_id: 1,
            start_node_id: start.id,
            end_node_id: end.id,
            bidirectional: true,
            geometry: vec![start.position, end.position],
            length: start.position.distance(end.position),
            active: true,
            maintenance: false,
            speed_limit: None,
            is_rest_path: false,
            rest_capacity: None,
        }
    }

    fn pending(outbox_id: &str, correlation_id: &str) -> OutboxEntry {
        OutboxEntry {
            outbox_id: outbox_id.to_string(),
            correlation_id: correlation_id.to_string(),
            robot_id: "r1".to_string(),
            subject: "fleet.robot.r1.route".to_string(),
            payload: serde_json::json!({"go": true}),
            created_at: 1000,
            last_attempt: 1000,
            retry_count: 0,
            status: OutboxStatus::Pending,
            last_error: None,
            dead_letter_published: false,
        }
    }

    // ── Graph CRUD ─────────────────────────────────────────────────

    #[test]
    fn node_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let n = node(1, 0.0, 0.0);
        store.put_node(&n).unwrap();
        assert_eq!(store.get_node(1).unwrap(), Some(n));
        assert!(store.get_node(2).unwrap().is_none());
    }

    #[test]
    fn lists_are_scoped_to_map() {
        let store = StateStore::open_in_memory().unwrap();
        let (a, b) = (node(1, 0.0, 0.0), node(2, 10.0, 0.0));
        let mut other = node(3, 5.0, 5.0);
        other.map_id = 2;
        for n in [&a, &b, &other] {
            store.put_node(n).unwrap();
        }
        store.put_edge(&edge(10, &a, &b)).unwrap();

        assert_eq!(store.list_nodes(1).unwrap().len(), 2);
        assert_eq!(store.list_nodes(2).unwrap().len(), 1);
        assert_eq!(store.list_edges(1).unwrap().len(), 1);
        assert!(store.list_edges(2).unwrap().is_empty());
    }

    #[test]
    fn delete_reports_existence() {
        let store = StateStore::open_in_memory().unwrap();
        let (a, b) = (node(1, 0.0, 0.0), node(2, 10.0, 0.0));
        store.put_edge(&edge(10, &a, &b)).unwrap();
        assert!(store.delete_edge(10).unwrap());
        assert!(!store.delete_edge(10).unwrap());
        assert!(!store.delete_node(99).unwrap());
    }

    // ── Import ─────────────────────────────────────────────────────

    #[test]
    fn import_writes_consistent_map() {
        let store = StateStore::open_in_memory().unwrap();
        let (a, b) = (node(1, 0.0, 0.0), node(2, 10.0, 0.0));
        let doc = MapDocument {
            edges: vec![edge(10, &a, &b)],
            nodes: vec![a, b],
        };
        let summary = store.import_map(&doc).unwrap();
        assert_eq!(summary, ImportSummary { nodes: 2, edges: 1 });
        assert_eq!(store.get_edge(10).unwrap().map(|e| e.length), Some(10.0));
    }

    #[test]
    fn import_rejects_detached_geometry_atomically() {
        let store = StateStore::open_in_memory().unwrap();
        let (a, b) = (node(1, 0.0, 0.0), node(2, 10.0, 0.0));
        let mut bad = edge(10, &a, &b);
        bad.geometry[1] = Point::new(10.0, 0.5);
        let doc = MapDocument {
            edges: vec![bad],
            nodes: vec![a, b],
        };
        let err = store.import_map(&doc).unwrap_err();
        assert!(matches!(err, StateError::InvalidMap(_)));
        assert!(store.list_nodes(1).unwrap().is_empty());
    }

    #[test]
    fn import_resolves_nodes_already_stored() {
        let store = StateStore::open_in_memory().unwrap();
        let (a, b) = (node(1, 0.0, 0.0), node(2, 10.0, 0.0));
        store.put_node(&a).unwrap();
        let doc = MapDocument {
            edges: vec![edge(10, &a, &b)],
            nodes: vec![b],
        };
        store.import_map(&doc).unwrap();

        let missing = MapDocument {
            edges: vec![edge(11, &a, &node(7, 1.0, 1.0))],
            nodes: vec![],
        };
        assert!(store.import_map(&missing).is_err());
    }

    // ── Outbox ─────────────────────────────────────────────────────

    #[test]
    fn outbox_insert_and_list_by_status() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_outbox(&pending("o1", "c1")).unwrap();
        let mut done = pending("o2", "c2");
        done.status = OutboxStatus::Acked;
        store.insert_outbox(&done).unwrap();

        assert_eq!(store.list_outbox(None).unwrap().len(), 2);
        let pend = store.list_outbox(Some(OutboxStatus::Pending)).unwrap();
        assert_eq!(pend.len(), 1);
        assert_eq!(pend[0].outbox_id, "o1");
        // Terminal entries are not correlated.
        assert!(store.update_outbox_by_correlation("c2", |_| ()).unwrap().is_none());
    }

    #[test]
    fn correlation_update_moves_index() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_outbox(&pending("o1", "c1")).unwrap();

        let (entry, attempt) = store
            .update_outbox_by_correlation("c1", |e| {
                e.retry_count += 1;
                e.correlation_id = "c2".to_string();
                e.retry_count
            })
            .unwrap()
            .unwrap();
        assert_eq!(attempt, 1);
        assert_eq!(entry.correlation_id, "c2");

        // The old correlation id no longer resolves; the new one does.
        assert!(store.update_outbox_by_correlation("c1", |_| ()).unwrap().is_none());
        let (entry, _) = store
            .update_outbox_by_correlation("c2", |e| e.status = OutboxStatus::Acked)
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, OutboxStatus::Acked);
        assert!(store.update_outbox_by_correlation("c2", |_| ()).unwrap().is_none());
        assert_eq!(
            store.get_outbox("o1").unwrap().map(|e| e.status),
            Some(OutboxStatus::Acked)
        );
    }

    #[test]
    fn dead_letter_publication_is_flagged_once_terminal() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_outbox(&pending("o1", "c1")).unwrap();
        assert!(!store.mark_dead_letter_published("o1").unwrap());
        assert!(!store.mark_dead_letter_published("missing").unwrap());

        store
            .update_outbox_by_correlation("c1", |e| e.status = OutboxStatus::DeadLetter)
            .unwrap();
        assert!(store.mark_dead_letter_published("o1").unwrap());
        assert!(store.get_outbox("o1").unwrap().unwrap().dead_letter_published);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("fleet.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_node(&node(1, 2.0, 3.0)).unwrap();
            store.insert_outbox(&pending("o1", "c1")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(
            store.get_node(1).unwrap().map(|n| n.position),
            Some(Point::new(2.0, 3.0))
        );
        assert!(store.update_outbox_by_correlation("c1", |_| ()).unwrap().is_some());
    }
}
