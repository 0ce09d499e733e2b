//! redb table definitions for the FleetGrid state store.
//!
//! Graph tables are keyed by the numeric id; outbox tables use `&str` keys.
//! Values are JSON-serialized domain types.

use redb::TableDefinition;

/// Map graph nodes keyed by node id.
pub const NODES: TableDefinition<i64, &[u8]> = TableDefinition::new("nodes");

/// Map graph edges keyed by edge id.
pub const EDGES: TableDefinition<i64, &[u8]> = TableDefinition::new("edges");

/// Command outbox entries keyed by `{outbox_id}`.
pub const OUTBOX: TableDefinition<&str, &[u8]> = TableDefinition::new("outbox");

/// Live correlation index: `{correlation_id}` → `{outbox_id}`.
///
/// Only pending entries have a row here.
pub const CORRELATIONS: TableDefinition<&str, &str> = TableDefinition::new("correlations");
