//! OccupancyService — exclusive holders of graph nodes and directed edges.
//!
//! Each map has its own lock; the holder maps never leave the methods that
//! hold it. A robot holds at most one key: claiming a new key releases its
//! previous one in the same critical section, and then drops anything it
//! still holds on other maps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use fleet_core::{MapId, NodeId, RobotId};

/// What a robot can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OccupancyKey {
    /// A junction manoeuvre around one node.
    #[serde(rename_all = "camelCase")]
    Node { node_id: NodeId },
    /// A directed traversal from one node to another.
    #[serde(rename_all = "camelCase")]
    Edge { from_node_id: NodeId, to_node_id: NodeId },
}

impl OccupancyKey {
    pub fn edge(from: NodeId, to: NodeId) -> Self {
        OccupancyKey::Edge {
            from_node_id: from,
            to_node_id: to,
        }
    }

    pub fn node(node_id: NodeId) -> Self {
        OccupancyKey::Node { node_id }
    }
}

/// Result of a claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The robot now holds the key. `released` lists what it gave up.
    Granted { released: Vec<(MapId, OccupancyKey)> },
    /// Another robot holds the key; nothing changed.
    Held { holder: RobotId },
}

/// One holder entry of a [`OccupancySnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeldKey {
    pub key: OccupancyKey,
    pub robot_id: RobotId,
}

/// Point-in-time copy of one map's occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancySnapshot {
    pub map_id: MapId,
    pub held: Vec<HeldKey>,
}

#[derive(Debug, Default)]
struct MapOccupancy {
    node_holder: HashMap<NodeId, RobotId>,
    edge_holder: HashMap<(NodeId, NodeId), RobotId>,
    held_by: HashMap<RobotId, OccupancyKey>,
}

impl MapOccupancy {
    fn holder(&self, key: &OccupancyKey) -> Option<&RobotId> {
        match key {
            OccupancyKey::Node { node_id } => self.node_holder.get(node_id),
            OccupancyKey::Edge {
                from_node_id,
                to_node_id,
            } => self.edge_holder.get(&(*from_node_id, *to_node_id)),
        }
    }

    fn release(&mut self, robot_id: &str) -> Option<OccupancyKey> {
        let key = self.held_by.remove(robot_id)?;
        match key {
            OccupancyKey::Node { node_id } => {
                self.node_holder.remove(&node_id);
            }
            OccupancyKey::Edge {
                from_node_id,
                to_node_id,
            } => {
                self.edge_holder.remove(&(from_node_id, to_node_id));
            }
        }
        Some(key)
    }

    fn insert(&mut self, key: OccupancyKey, robot_id: &str) {
        match key {
            OccupancyKey::Node { node_id } => {
                self.node_holder.insert(node_id, robot_id.to_string());
            }
            OccupancyKey::Edge {
                from_node_id,
                to_node_id,
            } => {
                self.edge_holder
                    .insert((from_node_id, to_node_id), robot_id.to_string());
            }
        }
        self.held_by.insert(robot_id.to_string(), key);
    }

    fn len(&self) -> usize {
        self.held_by.len()
    }
}

/// Per-map occupancy registry.
#[derive(Default)]
pub struct OccupancyService {
    maps: RwLock<HashMap<MapId, Arc<Mutex<MapOccupancy>>>>,
}

impl OccupancyService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or lazily create the lock of one map.
    fn map(&self, map_id: MapId) -> Arc<Mutex<MapOccupancy>> {
        if let Some(map) = self.maps.read().expect("occupancy lock").get(&map_id) {
            return map.clone();
        }
        self.maps
            .write()
            .expect("occupancy lock")
            .entry(map_id)
            .or_default()
            .clone()
    }

    fn existing_maps(&self) -> Vec<(MapId, Arc<Mutex<MapOccupancy>>)> {
        self.maps
            .read()
            .expect("occupancy lock")
            .iter()
            .map(|(id, m)| (*id, m.clone()))
            .collect()
    }

    /// Claim `key` on `map_id` for `robot_id`.
    ///
    /// Holder check, release of the robot's previous key and the new claim
    /// happen under the map's lock. A key held by another robot is never
    /// overwritten.
    pub fn claim(&self, map_id: MapId, key: OccupancyKey, robot_id: &str) -> ClaimOutcome {
        let mut released = Vec::new();
        {
            let map = self.map(map_id);
            let mut occ = map.lock().expect("map occupancy lock");
            if let Some(holder) = occ.holder(&key) {
                if holder != robot_id {
                    return ClaimOutcome::Held {
                        holder: holder.clone(),
                    };
                }
            }
            if let Some(previous) = occ.release(robot_id) {
                if previous != key {
                    released.push((map_id, previous));
                }
            }
            occ.insert(key, robot_id);
        }

        // Hand-over: the robot left whatever map it was on before.
        for (other_id, other) in self.existing_maps() {
            if other_id == map_id {
                continue;
            }
            let mut occ = other.lock().expect("map occupancy lock");
            if let Some(previous) = occ.release(robot_id) {
                released.push((other_id, previous));
            }
        }

        debug!(%robot_id, map_id, ?key, released = released.len(), "occupancy claimed");
        ClaimOutcome::Granted { released }
    }

    /// Drop everything `robot_id` holds on every map.
    pub fn release_robot(&self, robot_id: &str) -> Vec<(MapId, OccupancyKey)> {
        let mut released = Vec::new();
        for (map_id, map) in self.existing_maps() {
            let mut occ = map.lock().expect("map occupancy lock");
            if let Some(key) = occ.release(robot_id) {
                released.push((map_id, key));
            }
        }
        if !released.is_empty() {
            debug!(%robot_id, count = released.len(), "occupancy released");
        }
        released
    }

    pub fn holder(&self, map_id: MapId, key: &OccupancyKey) -> Option<RobotId> {
        let map = self.maps.read().expect("occupancy lock").get(&map_id)?.clone();
        let occ = map.lock().expect("map occupancy lock");
        occ.holder(key).cloned()
    }

    /// The key `robot_id` holds, if any.
    pub fn held_by(&self, robot_id: &str) -> Option<(MapId, OccupancyKey)> {
        self.existing_maps().into_iter().find_map(|(map_id, map)| {
            let occ = map.lock().expect("map occupancy lock");
            occ.held_by.get(robot_id).map(|key| (map_id, *key))
        })
    }

    /// Every robot holding a key on any map, sorted.
    pub fn holders(&self) -> Vec<RobotId> {
        let mut robots: Vec<RobotId> = self
            .existing_maps()
            .into_iter()
            .flat_map(|(_, map)| {
                let occ = map.lock().expect("map occupancy lock");
                occ.held_by.keys().cloned().collect::<Vec<_>>()
            })
            .collect();
        robots.sort();
        robots.dedup();
        robots
    }

    /// Holders of one map, sorted by robot id.
    pub fn snapshot(&self, map_id: MapId) -> OccupancySnapshot {
        let Some(map) = self.maps.read().expect("occupancy lock").get(&map_id).cloned() else {
            return OccupancySnapshot {
                map_id,
                held: Vec::new(),
            };
        };
        let occ = map.lock().expect("map occupancy lock");
        let mut held: Vec<HeldKey> = occ
            .held_by
            .iter()
            .map(|(robot_id, key)| HeldKey {
                key: *key,
                robot_id: robot_id.clone(),
            })
            .collect();
        held.sort_by(|a, b| a.robot_id.cmp(&b.robot_id));
        OccupancySnapshot { map_id, held }
    }

    /// Number of held keys per map, sorted by map id.
    pub fn counts(&self) -> Vec<(MapId, usize)> {
        let mut counts: Vec<(MapId, usize)> = self
            .existing_maps()
            .into_iter()
            .map(|(id, map)| (id, map.lock().expect("map occupancy lock").len()))
            .collect();
        counts.sort_by_key(|(id, _)| *id);
        counts
    }

    /// Check the holder maps against the per-robot index.
    #[cfg(test)]
    fn assert_consistent(&self) {
        let mut seen: HashMap<RobotId, MapId> = HashMap::new();
        for (map_id, map) in self.existing_maps() {
            let occ = map.lock().unwrap();
            assert_eq!(
                occ.node_holder.len() + occ.edge_holder.len(),
                occ.held_by.len(),
                "holder maps and index disagree on map {map_id}"
            );
            for (robot, key) in &occ.held_by {
                assert_eq!(occ.holder(key), Some(robot));
                if let Some(other) = seen.insert(robot.clone(), map_id) {
                    panic!("robot {robot} holds keys on maps {other} and {map_id}");
                }
            }
        }
    }
}
