//! Presence monitor — background sweep for robots that went silent.
//!
//! A robot whose last telemetry was received more than `offline_after` ago
//! is treated as disconnected: everything it holds is released and its
//! cache entry dropped, so its edges cannot stay stuck. A robot holding a
//! key without ever reporting telemetry is timed from the first sweep that
//! notices it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info};

use fleet_core::RobotId;

use crate::occupancy::OccupancyService;
use crate::positions::LivePositionCache;

/// Invoked for every robot declared offline, with the number of released keys.
pub type OfflineCallback = Arc<dyn Fn(&RobotId, usize) + Send + Sync>;

pub struct PresenceMonitor {
    positions: Arc<LivePositionCache>,
    occupancy: Arc<OccupancyService>,
    offline_after: Duration,
    sweep_interval: Duration,
    on_offline: Option<OfflineCallback>,
    /// Holders with no cache entry, and when a sweep first saw them.
    unseen_holders: Mutex<HashMap<RobotId, Instant>>,
}

impl PresenceMonitor {
    pub fn new(
        positions: Arc<LivePositionCache>,
        occupancy: Arc<OccupancyService>,
        offline_after: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            positions,
            occupancy,
            offline_after,
            sweep_interval,
            on_offline: None,
            unseen_holders: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_callback(mut self, callback: OfflineCallback) -> Self {
        self.on_offline = Some(callback);
        self
    }

    /// Release every robot silent at `now`. Returns the robots released.
    pub fn sweep(&self, now: Instant) -> Vec<RobotId> {
        let mut silent = self.positions.silent_robots(now, self.offline_after);
        silent.extend(self.expired_unseen_holders(now));
        for robot_id in &silent {
            let released = self.occupancy.release_robot(robot_id).len();
            self.positions.remove(robot_id);
            info!(%robot_id, released, "robot offline, occupancy released");
            if let Some(cb) = &self.on_offline {
                cb(robot_id, released);
            }
        }
        silent
    }

    /// Holders without telemetry that have been holding for `offline_after`.
    fn expired_unseen_holders(&self, now: Instant) -> Vec<RobotId> {
        let mut unseen = self.unseen_holders.lock().expect("presence lock");
        let holders: Vec<RobotId> = self
            .occupancy
            .holders()
            .into_iter()
            .filter(|robot_id| self.positions.get(robot_id).is_none())
            .collect();
        unseen.retain(|robot_id, _| holders.contains(robot_id));

        let mut expired = Vec::new();
        for robot_id in holders {
            let first_seen = *unseen.entry(robot_id.clone()).or_insert(now);
            if now.saturating_duration_since(first_seen) > self.offline_after {
                unseen.remove(&robot_id);
                expired.push(robot_id);
            }
        }
        expired
    }

    /// Sweep every `sweep_interval` until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        debug!(
            offline_after = ?self.offline_after,
            interval = ?self.sweep_interval,
            "presence monitor starting"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.sweep_interval) => {
                    self.sweep(Instant::now());
                }
                _ = shutdown.changed() => {
                    debug!("presence monitor shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::OccupancyKey;
    use fleet_core::TelemetryUpdate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pose(robot: &str) -> TelemetryUpdate {
        TelemetryUpdate::Pose {
            robot_id: robot.to_string(),
            map_id: Some(1),
            x: 0.0,
            y: 0.0,
            timestamp: 1.0,
        }
    }

    #[test]
    fn sweep_releases_silent_robots_only() {
        let positions = Arc::new(LivePositionCache::new());
        let occupancy = Arc::new(OccupancyService::new());
        let t0 = Instant::now();
        positions.apply_at(&pose("quiet"), t0);
        positions.apply_at(&pose("chatty"), t0 + Duration::from_secs(25));
        occupancy.claim(1, OccupancyKey::edge(1, 2), "quiet");
        occupancy.claim(1, OccupancyKey::edge(2, 3), "chatty");

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let monitor = PresenceMonitor::new(
            positions.clone(),
            occupancy.clone(),
            Duration::from_secs(30),
            Duration::from_secs(5),
        )
        .with_callback(Arc::new(move |_robot: &RobotId, released| {
            counter.fetch_add(released, Ordering::SeqCst);
        }));

        let released = monitor.sweep(t0 + Duration::from_secs(31));
        assert_eq!(released, vec!["quiet".to_string()]);
        assert!(positions.get("quiet").is_none());
        assert!(occupancy.held_by("quiet").is_none());
        assert!(occupancy.held_by("chatty").is_some());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn holder_without_telemetry_is_released_after_timeout() {
        let positions = Arc::new(LivePositionCache::new());
        let occupancy = Arc::new(OccupancyService::new());
        occupancy.claim(1, OccupancyKey::edge(1, 2), "mute");
        let monitor = PresenceMonitor::new(
            positions.clone(),
            occupancy.clone(),
            Duration::from_secs(30),
            Duration::from_secs(5),
        );

        let t0 = Instant::now();
        assert!(monitor.sweep(t0).is_empty());
        assert!(monitor.sweep(t0 + Duration::from_secs(20)).is_empty());
        assert!(occupancy.held_by("mute").is_some());

        assert_eq!(monitor.sweep(t0 + Duration::from_secs(31)), vec!["mute".to_string()]);
        assert!(occupancy.held_by("mute").is_none());
    }

    #[test]
    fn holder_that_starts_reporting_is_timed_by_telemetry() {
        let positions = Arc::new(LivePositionCache::new());
        let occupancy = Arc::new(OccupancyService::new());
        occupancy.claim(1, OccupancyKey::edge(1, 2), "late");
        let monitor = PresenceMonitor::new(
            positions.clone(),
            occupancy.clone(),
            Duration::from_secs(30),
            Duration::from_secs(5),
        );

        let t0 = Instant::now();
        monitor.sweep(t0);
        positions.apply_at(&pose("late"), t0 + Duration::from_secs(25));
        assert!(monitor.sweep(t0 + Duration::from_secs(40)).is_empty());
        assert!(occupancy.held_by("late").is_some());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let monitor = Arc::new(PresenceMonitor::new(
            Arc::new(LivePositionCache::new()),
            Arc::new(OccupancyService::new()),
            Duration::from_secs(30),
            Duration::from_millis(10),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(monitor.run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
