//! FleetService — the operations shared by the REST API and the bus workers.
//!
//! Wires the planner, arbiter and outbox around one state store and one
//! transport, and takes care of the side effects every entry point needs:
//! publishing results, realtime fan-out, and metrics.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fleet_core::config::{ConfigError, FleetConfig};
use fleet_core::{
    CommandAck, MapGraph, MapId, RobotId, RoutePlan, RouteFailure, RouteRequest, SegmentRequest,
    TelemetryUpdate, epoch_millis,
};
use fleetgrid_bus::{Fanout, Transport, publish_json, subjects};
use fleetgrid_dispatch::{AckOutcome, CommandOutbox, DispatchResult, DispatchSettings};
use fleetgrid_metrics::{FleetMetrics, render_prometheus};
use fleetgrid_planner::{PathService, PlannerSettings, RoutePlanner};
use fleetgrid_state::StateStore;
use fleetgrid_traffic::{
    Admission, AdmissionOutcome, ApplyOutcome, LivePositionCache, OccupancyService,
    PresenceMonitor, TrafficArbiter, TrafficSettings,
};

pub struct FleetService {
    store: StateStore,
    planner: RoutePlanner,
    arbiter: TrafficArbiter,
    outbox: CommandOutbox,
    transport: Arc<dyn Transport>,
    fanout: Arc<dyn Fanout>,
    metrics: Arc<FleetMetrics>,
    publish_timeout: Duration,
}

impl FleetService {
    /// Build the service with the store as map graph source.
    pub fn new(
        store: StateStore,
        transport: Arc<dyn Transport>,
        fanout: Arc<dyn Fanout>,
        config: &FleetConfig,
    ) -> Result<Self, ConfigError> {
        let graph: Arc<dyn MapGraph> = Arc::new(store.clone());
        let planner = RoutePlanner::new(graph.clone(), PlannerSettings::from_config(&config.planner)?);
        let arbiter = TrafficArbiter::new(
            graph,
            Arc::new(OccupancyService::new()),
            Arc::new(LivePositionCache::new()),
            TrafficSettings::from_config(&config.traffic)?,
        );
        let outbox = CommandOutbox::new(
            store.clone(),
            transport.clone(),
            DispatchSettings::from_config(&config.dispatch)?,
        );
        Ok(Self {
            store,
            planner,
            arbiter,
            outbox,
            transport,
            fanout,
            metrics: Arc::new(FleetMetrics::new()),
            publish_timeout: config.dispatch.publish_timeout()?,
        })
    }

    /// Consult an external path service before the built-in search.
    pub fn with_path_service(mut self, service: Arc<dyn PathService>) -> Self {
        self.planner = self.planner.with_path_service(service);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<FleetMetrics> {
        &self.metrics
    }

    pub fn occupancy(&self) -> &Arc<OccupancyService> {
        self.arbiter.occupancy()
    }

    pub fn positions(&self) -> &Arc<LivePositionCache> {
        self.arbiter.positions()
    }

    pub fn outbox(&self) -> &CommandOutbox {
        &self.outbox
    }

    // ── Routing ────────────────────────────────────────────────────

    /// Plan a route and send it to the robot through the outbox.
    ///
    /// Failures are reported to the robot on the same subject.
    pub async fn plan_route(&self, request: &RouteRequest) -> Result<RoutePlan, RouteFailure> {
        let started = Instant::now();
        match self.planner.plan(request).await {
            Ok(plan) => {
                self.metrics.record_route_planned(started.elapsed());
                info!(
                    robot_id = %plan.robot_id,
                    map_id = plan.map_id,
                    waypoints = plan.waypoints.len(),
                    length = plan.total_length,
                    "route planned"
                );
                self.dispatch_plan(&plan).await;
                Ok(plan)
            }
            Err(e) => {
                let failure = e.to_failure(request);
                self.metrics.record_route_failed(failure.reason);
                warn!(
                    robot_id = %request.robot_id,
                    map_id = request.map_id,
                    reason = ?failure.reason,
                    error = %e,
                    "route planning failed"
                );
                self.publish(&subjects::robot_route(&request.robot_id), &failure)
                    .await;
                Err(failure)
            }
        }
    }

    async fn dispatch_plan(&self, plan: &RoutePlan) {
        let payload = match serde_json::to_value(plan) {
            Ok(v) => v,
            Err(e) => {
                error!(robot_id = %plan.robot_id, error = %e, "route plan not serializable");
                return;
            }
        };
        let subject = subjects::robot_route(&plan.robot_id);
        match self.outbox.send(&plan.robot_id, &subject, payload.clone()).await {
            Ok(entry) => {
                self.metrics.record_command_sent();
                debug!(robot_id = %plan.robot_id, outbox_id = %entry.outbox_id, "route dispatched");
            }
            Err(e) => error!(robot_id = %plan.robot_id, error = %e, "route dispatch failed"),
        }
        self.fanout.notify(subjects::REALTIME_ROUTES, payload);
    }

    // ── Traffic ────────────────────────────────────────────────────

    /// Decide on a segment request and publish the decision to the robot.
    pub async fn admit(&self, request: &SegmentRequest) -> Admission {
        let admission = self.arbiter.admit(request).await;
        let fail_open = matches!(admission.outcome, AdmissionOutcome::FailOpen { .. });
        self.metrics
            .record_admission(admission.decision.allow, fail_open);
        self.publish(&subjects::robot_traffic(&request.robot_id), &admission.decision)
            .await;
        if matches!(admission.outcome, AdmissionOutcome::Granted { .. }) {
            self.notify_occupancy(request.map_id);
        }
        admission
    }

    pub fn ingest_telemetry(&self, update: &TelemetryUpdate) -> ApplyOutcome {
        let outcome = self.positions().apply(update);
        self.metrics
            .record_telemetry(outcome == ApplyOutcome::Applied);
        outcome
    }

    /// Release everything a robot holds and forget its position.
    /// Returns the number of keys released.
    pub fn release_robot(&self, robot_id: &str, reason: Option<&str>) -> usize {
        let released = self.occupancy().release_robot(robot_id);
        self.positions().remove(robot_id);
        self.metrics.record_robot_released();
        info!(
            %robot_id,
            released = released.len(),
            reason = reason.unwrap_or("unspecified"),
            "robot released"
        );
        let maps: BTreeSet<MapId> = released.iter().map(|(map_id, _)| *map_id).collect();
        for map_id in maps {
            self.notify_occupancy(map_id);
        }
        released.len()
    }

    /// Presence monitor over this service's caches, feeding the release
    /// counter.
    pub fn presence_monitor(&self, offline_after: Duration, sweep_interval: Duration) -> PresenceMonitor {
        let metrics = self.metrics.clone();
        PresenceMonitor::new(
            self.positions().clone(),
            self.occupancy().clone(),
            offline_after,
            sweep_interval,
        )
        .with_callback(Arc::new(move |_robot: &RobotId, _released: usize| {
            metrics.record_robot_released();
        }))
    }

    fn notify_occupancy(&self, map_id: MapId) {
        match serde_json::to_value(self.occupancy().snapshot(map_id)) {
            Ok(payload) => self.fanout.notify(subjects::REALTIME_OCCUPANCY, payload),
            Err(e) => warn!(map_id, error = %e, "occupancy snapshot not serializable"),
        }
    }

    // ── Commands ───────────────────────────────────────────────────

    pub async fn handle_ack(&self, ack: &CommandAck) -> DispatchResult<AckOutcome> {
        let outcome = self.outbox.handle_ack(ack).await?;
        self.record_ack(&outcome);
        Ok(outcome)
    }

    /// NAK every command whose ack is overdue at `now_ms`.
    pub async fn redeliver_overdue(&self, now_ms: u64) -> DispatchResult<Vec<AckOutcome>> {
        let outcomes = self.outbox.redeliver_overdue(now_ms).await?;
        for outcome in &outcomes {
            self.record_ack(outcome);
        }
        Ok(outcomes)
    }

    /// Sweep for overdue commands every `interval` until shutdown.
    pub async fn run_redelivery(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        debug!(?interval, "redelivery loop starting");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.redeliver_overdue(epoch_millis()).await {
                        Ok(outcomes) if !outcomes.is_empty() => {
                            debug!(count = outcomes.len(), "overdue commands handled");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "redelivery sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("redelivery loop shutting down");
                    break;
                }
            }
        }
    }

    fn record_ack(&self, outcome: &AckOutcome) {
        match outcome {
            AckOutcome::Acked { .. } => self.metrics.record_command_acked(),
            AckOutcome::Retried { .. } => self.metrics.record_command_retried(),
            AckOutcome::DeadLettered { .. } => self.metrics.record_command_dead_lettered(),
            AckOutcome::Uncorrelated { .. } => self.metrics.record_ack_uncorrelated(),
        }
    }

    // ── Metrics ────────────────────────────────────────────────────

    pub fn render_metrics(&self) -> String {
        render_prometheus(
            &self.metrics.snapshot(),
            &self.occupancy().counts(),
            self.positions().len(),
        )
    }

    async fn publish<T: Serialize>(&self, subject: &str, value: &T) {
        if let Err(e) = publish_json(self.transport.as_ref(), subject, value, self.publish_timeout).await {
            warn!(%subject, error = %e, "publish failed");
        }
    }
}
