//! Metrics collector — process-wide FleetGrid counters.
//!
//! Counters are plain atomics so recording never blocks a worker. Planning
//! latency samples sit behind a mutex and are cleared every summary window.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use fleet_core::RouteFailureReason;

#[derive(Debug, Default)]
pub struct FleetMetrics {
    routes_planned: AtomicU64,
    routes_no_anchor: AtomicU64,
    routes_no_path: AtomicU64,
    routes_graph_unavailable: AtomicU64,
    admissions_allowed: AtomicU64,
    admissions_denied: AtomicU64,
    admissions_fail_open: AtomicU64,
    telemetry_applied: AtomicU64,
    telemetry_out_of_order: AtomicU64,
    commands_sent: AtomicU64,
    commands_acked: AtomicU64,
    commands_retried: AtomicU64,
    commands_dead_lettered: AtomicU64,
    acks_uncorrelated: AtomicU64,
    robots_released: AtomicU64,
    /// Planning latency samples (microseconds) for the current window.
    plan_latencies: Mutex<Vec<u64>>,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub routes_planned: u64,
    pub routes_no_anchor: u64,
    pub routes_no_path: u64,
    pub routes_graph_unavailable: u64,
    pub admissions_allowed: u64,
    pub admissions_denied: u64,
    pub admissions_fail_open: u64,
    pub telemetry_applied: u64,
    pub telemetry_out_of_order: u64,
    pub commands_sent: u64,
    pub commands_acked: u64,
    pub commands_retried: u64,
    pub commands_dead_lettered: u64,
    pub acks_uncorrelated: u64,
    pub robots_released: u64,
    pub plan_latency_p50_ms: f64,
    pub plan_latency_p99_ms: f64,
}

impl MetricsSnapshot {
    pub fn route_failures(&self) -> u64 {
        self.routes_no_anchor + self.routes_no_path + self.routes_graph_unavailable
    }
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_route_planned(&self, latency: Duration) {
        self.routes_planned.fetch_add(1, Ordering::Relaxed);
        self.plan_latencies
            .lock()
            .expect("latency lock")
            .push(latency.as_micros() as u64);
    }

    pub fn record_route_failed(&self, reason: RouteFailureReason) {
        let counter = match reason {
            RouteFailureReason::NoAnchor => &self.routes_no_anchor,
            RouteFailureReason::NoPath => &self.routes_no_path,
            RouteFailureReason::GraphUnavailable => &self.routes_graph_unavailable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one admission decision. Fail-open decisions are allowed too,
    /// and count towards both counters.
    pub fn record_admission(&self, allowed: bool, fail_open: bool) {
        if allowed {
            self.admissions_allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.admissions_denied.fetch_add(1, Ordering::Relaxed);
        }
        if fail_open {
            self.admissions_fail_open.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_telemetry(&self, applied: bool) {
        if applied {
            self.telemetry_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.telemetry_out_of_order.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_acked(&self) {
        self.commands_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_retried(&self) {
        self.commands_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_dead_lettered(&self) {
        self.commands_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_uncorrelated(&self) {
        self.acks_uncorrelated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_robot_released(&self) {
        self.robots_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (p50, p99) = compute_percentiles(&self.plan_latencies.lock().expect("latency lock"));
        MetricsSnapshot {
            routes_planned: self.routes_planned.load(Ordering::Relaxed),
            routes_no_anchor: self.routes_no_anchor.load(Ordering::Relaxed),
            routes_no_path: self.routes_no_path.load(Ordering::Relaxed),
            routes_graph_unavailable: self.routes_graph_unavailable.load(Ordering::Relaxed),
            admissions_allowed: self.admissions_allowed.load(Ordering::Relaxed),
            admissions_denied: self.admissions_denied.load(Ordering::Relaxed),
            admissions_fail_open: self.admissions_fail_open.load(Ordering::Relaxed),
            telemetry_applied: self.telemetry_applied.load(Ordering::Relaxed),
            telemetry_out_of_order: self.telemetry_out_of_order.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            commands_acked: self.commands_acked.load(Ordering::Relaxed),
            commands_retried: self.commands_retried.load(Ordering::Relaxed),
            commands_dead_lettered: self.commands_dead_lettered.load(Ordering::Relaxed),
            acks_uncorrelated: self.acks_uncorrelated.load(Ordering::Relaxed),
            robots_released: self.robots_released.load(Ordering::Relaxed),
            plan_latency_p50_ms: p50,
            plan_latency_p99_ms: p99,
        }
    }

    /// Log a summary every `interval` until shutdown, starting a fresh
    /// latency window each time.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "metrics summary started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let s = self.snapshot();
                    info!(
                        routes_planned = s.routes_planned,
                        route_failures = s.route_failures(),
                        admissions_allowed = s.admissions_allowed,
                        admissions_denied = s.admissions_denied,
                        fail_open = s.admissions_fail_open,
                        commands_sent = s.commands_sent,
                        dead_lettered = s.commands_dead_lettered,
                        plan_p99_ms = s.plan_latency_p99_ms,
                        "fleet metrics"
                    );
                    self.plan_latencies.lock().expect("latency lock").clear();
                }
                _ = shutdown.changed() => {
                    debug!("metrics summary shutting down");
                    break;
                }
            }
        }
    }
}

/// Compute P50 and P99 latency from unsorted samples.
///
/// Returns (p50_ms, p99_ms). If empty, returns (0.0, 0.0).
fn compute_percentiles(latencies: &[u64]) -> (f64, f64) {
    if latencies.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();

    let p50_idx = (sorted.len() as f64 * 0.50) as usize;
    let p99_idx = (sorted.len() as f64 * 0.99) as usize;

    let p50 = sorted[p50_idx.min(sorted.len() - 1)] as f64 / 1000.0;
    let p99 = sorted[p99_idx.min(sorted.len() - 1)] as f64 / 1000.0;

    (p50, p99)
}
