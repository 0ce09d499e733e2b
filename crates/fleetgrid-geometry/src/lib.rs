//! fleetgrid-geometry — the Geometry Resolver.
//!
//! Pure functions over the map graph, shared by the route planner and the
//! traffic arbiter. Nothing here holds state or performs I/O.
//!
//! # Architecture
//!
//! ```text
//!  (x, y) ──► MapSnapshot ──► nearest edge ──► nearer endpoint ──► NodeId
//!                 │
//!                 └─► edge_between(from, to) ──► (Edge, direction)
//!
//!  polyline ──► project_onto_polyline ──► arc length
//!           ──► sample_polyline(start, end, step) ──► waypoints
//! ```

pub mod polyline;
pub mod resolver;

pub use polyline::{
    DEFAULT_SAMPLE_STEP, Projection, Side, cumulative_lengths, point_at_arc_length,
    point_to_polyline_distance, point_to_segment_distance, polyline_length, project_onto_polyline,
    sample_polyline,
};
pub use resolver::{EdgeMatch, MapSnapshot, effective_length};
