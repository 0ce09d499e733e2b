//! LivePositionCache — last known position and state of every robot.
//!
//! Backed by a `DashMap` so telemetry writers and admission readers never
//! wait on each other. Entries carry two clocks: the robot's own timestamp,
//! used to drop out-of-order updates, and the local receive instant, used
//! for staleness.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::trace;

use fleet_core::{MapId, Point, RobotId, RobotState, TelemetryUpdate};

/// Merged view of everything a robot has reported.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotPosition {
    pub robot_id: RobotId,
    pub map_id: Option<MapId>,
    pub position: Option<Point>,
    pub state: RobotState,
    /// Robot-side timestamp of the newest applied update.
    pub reported_at: f64,
    /// Local instant the newest update was applied.
    pub received_at: Instant,
}

impl RobotPosition {
    fn empty(robot_id: &str, now: Instant) -> Self {
        Self {
            robot_id: robot_id.to_string(),
            map_id: None,
            position: None,
            state: RobotState::Unknown,
            reported_at: f64::NEG_INFINITY,
            received_at: now,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.received_at)
    }

    pub fn is_fresh(&self, now: Instant, horizon: Duration) -> bool {
        self.age(now) <= horizon
    }

    pub fn view(&self, now: Instant) -> PositionView {
        PositionView {
            robot_id: self.robot_id.clone(),
            map_id: self.map_id,
            x: self.position.map(|p| p.x),
            y: self.position.map(|p| p.y),
            state: self.state.to_string(),
            timestamp: self.reported_at,
            age_secs: self.age(now).as_secs_f64(),
        }
    }

    /// Fold one update into this record. Absent fields keep their value.
    fn merge(&mut self, update: &TelemetryUpdate, now: Instant) {
        match update {
            TelemetryUpdate::Pose { map_id, x, y, .. } => {
                if map_id.is_some() {
                    self.map_id = *map_id;
                }
                self.position = Some(Point::new(*x, *y));
            }
            TelemetryUpdate::Status { state, .. } => {
                self.state = state.clone();
            }
            TelemetryUpdate::Snapshot {
                map_id, x, y, state, ..
            } => {
                if map_id.is_some() {
                    self.map_id = *map_id;
                }
                let previous = self.position;
                let x = x.or(previous.map(|p| p.x));
                let y = y.or(previous.map(|p| p.y));
                if let (Some(x), Some(y)) = (x, y) {
                    self.position = Some(Point::new(x, y));
                }
                if let Some(state) = state {
                    self.state = state.clone();
                }
            }
        }
        self.reported_at = update.timestamp();
        self.received_at = now;
    }
}

/// JSON view of a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub robot_id: RobotId,
    pub map_id: Option<MapId>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub state: String,
    pub timestamp: f64,
    pub age_secs: f64,
}

/// What happened to an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Older than what the cache already holds; dropped.
    OutOfOrder,
}

#[derive(Default)]
pub struct LivePositionCache {
    entries: DashMap<RobotId, RobotPosition>,
}

impl LivePositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, update: &TelemetryUpdate) -> ApplyOutcome {
        self.apply_at(update, Instant::now())
    }

    /// Apply an update as if it was received at `now`.
    pub fn apply_at(&self, update: &TelemetryUpdate, now: Instant) -> ApplyOutcome {
        let robot_id = update.robot_id();
        match self.entries.entry(robot_id.to_string()) {
            Entry::Occupied(mut slot) => {
                if update.timestamp() < slot.get().reported_at {
                    trace!(%robot_id, "out-of-order telemetry dropped");
                    return ApplyOutcome::OutOfOrder;
                }
                slot.get_mut().merge(update, now);
            }
            Entry::Vacant(slot) => {
                let mut record = RobotPosition::empty(robot_id, now);
                record.merge(update, now);
                slot.insert(record);
            }
        }
        ApplyOutcome::Applied
    }

    pub fn get(&self, robot_id: &str) -> Option<RobotPosition> {
        self.entries.get(robot_id).map(|e| e.value().clone())
    }

    pub fn remove(&self, robot_id: &str) -> Option<RobotPosition> {
        self.entries.remove(robot_id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Robots on `map_id` with a known position heard from within `horizon`.
    pub fn fresh_on_map(&self, map_id: MapId, now: Instant, horizon: Duration) -> Vec<RobotPosition> {
        self.entries
            .iter()
            .filter(|e| {
                let r = e.value();
                r.map_id == Some(map_id) && r.position.is_some() && r.is_fresh(now, horizon)
            })
            .map(|e| e.value().clone())
            .collect()
    }

    /// Robots not heard from for longer than `silence`.
    pub fn silent_robots(&self, now: Instant, silence: Duration) -> Vec<RobotId> {
        self.entries
            .iter()
            .filter(|e| e.value().age(now) > silence)
            .map(|e| e.key().clone())
            .collect()
    }

    /// All entries, sorted by robot id.
    pub fn views(&self, now: Instant) -> Vec<PositionView> {
        let mut views: Vec<PositionView> = self.entries.iter().map(|e| e.value().view(now)).collect();
        views.sort_by(|a, b| a.robot_id.cmp(&b.robot_id));
        views
    }
}
