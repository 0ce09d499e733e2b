//! Bus workers — one subscription per inbound subject.
//!
//! Request-style messages (routes, segments, acks, releases) are handled in
//! their own task so a slow graph query never holds up the next robot.
//! Telemetry is applied inline, in arrival order.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use fleet_core::{CommandAck, ReleaseSignal, RouteRequest, SegmentRequest, TelemetryUpdate};
use fleetgrid_api::FleetService;
use fleetgrid_bus::{Subscription, Transport, subjects};

/// How a worker runs its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// One task per message.
    Spawn,
    /// Await each message before taking the next.
    Inline,
}

/// Subscribe to every inbound subject and start a worker for each.
pub fn spawn_workers(
    service: Arc<FleetService>,
    transport: &dyn Transport,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();

    let svc = service.clone();
    handles.push(spawn_worker(
        transport.subscribe(subjects::ROUTE_REQUEST)?,
        Mode::Spawn,
        shutdown.clone(),
        move |req: RouteRequest| {
            let svc = svc.clone();
            async move {
                // The outcome is published by the service.
                let _ = svc.plan_route(&req).await;
            }
        },
    ));

    let svc = service.clone();
    handles.push(spawn_worker(
        transport.subscribe(subjects::SEGMENT_REQUEST)?,
        Mode::Spawn,
        shutdown.clone(),
        move |req: SegmentRequest| {
            let svc = svc.clone();
            async move {
                svc.admit(&req).await;
            }
        },
    ));

    let svc = service.clone();
    handles.push(spawn_worker(
        transport.subscribe(subjects::TELEMETRY)?,
        Mode::Inline,
        shutdown.clone(),
        move |update: TelemetryUpdate| {
            svc.ingest_telemetry(&update);
            std::future::ready(())
        },
    ));

    let svc = service.clone();
    handles.push(spawn_worker(
        transport.subscribe(subjects::COMMAND_ACK)?,
        Mode::Spawn,
        shutdown.clone(),
        move |ack: CommandAck| {
            let svc = svc.clone();
            async move {
                if let Err(e) = svc.handle_ack(&ack).await {
                    error!(correlation_id = %ack.correlation_id, error = %e, "ack handling failed");
                }
            }
        },
    ));

    let svc = service;
    handles.push(spawn_worker(
        transport.subscribe(subjects::ROBOT_OFFLINE)?,
        Mode::Spawn,
        shutdown,
        move |signal: ReleaseSignal| {
            let svc = svc.clone();
            async move {
                svc.release_robot(&signal.robot_id, signal.reason.as_deref());
            }
        },
    ));

    debug!(workers = handles.len(), "bus workers started");
    Ok(handles)
}

fn spawn_worker<T, F, Fut>(
    mut subscription: Subscription,
    mode: Mode,
    mut shutdown: watch::Receiver<bool>,
    handler: F,
) -> JoinHandle<()>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = subscription.recv() => {
                    let Some(msg) = msg else {
                        warn!(subject = %subscription.subject(), "subscription closed");
                        break;
                    };
                    let value: T = match msg.decode() {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "undecodable message dropped");
                            continue;
                        }
                    };
                    match mode {
                        Mode::Spawn => {
                            tokio::spawn(handler(value));
                        }
                        Mode::Inline => handler(value).await,
                    }
                }
                _ = shutdown.changed() => {
                    debug!(subject = %subscription.subject(), "worker shutting down");
                    break;
                }
            }
        }
    })
}
