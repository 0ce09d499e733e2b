//! Route planner error types.

use thiserror::Error;

use fleet_core::{GraphError, MapId, NodeId, Point, RouteFailure, RouteFailureReason, RouteRequest};

/// Why a plan could not be produced.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlannerError {
    #[error("no graph anchor near {point} on map {map_id}")]
    NoAnchor { map_id: MapId, point: Point },

    #[error("node {from} cannot reach node {to} over active edges")]
    NoPath { from: NodeId, to: NodeId },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type PlannerResult<T> = Result<T, PlannerError>;

impl PlannerError {
    pub fn reason(&self) -> RouteFailureReason {
        match self {
            PlannerError::NoAnchor { .. } => RouteFailureReason::NoAnchor,
            PlannerError::NoPath { .. } => RouteFailureReason::NoPath,
            PlannerError::Graph(_) => RouteFailureReason::GraphUnavailable,
        }
    }

    /// Structured "unreachable goal" report for the requester.
    pub fn to_failure(&self, request: &RouteRequest) -> RouteFailure {
        RouteFailure {
            robot_id: request.robot_id.clone(),
            map_id: request.map_id,
            reason: self.reason(),
            message: self.to_string(),
        }
    }
}
