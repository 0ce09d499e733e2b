//! fleetgrid-state — embedded state store for FleetGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the map graph and the command outbox.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Graph records are keyed by their numeric id; outbox entries by outbox id,
//! with a separate correlation index that only covers pending entries.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and implements [`fleet_core::MapGraph`], so it can back the planner and
//! the arbiter directly.

pub mod error;
pub mod graph;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
