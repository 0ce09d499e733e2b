//! Prometheus text exposition format.

use fleet_core::MapId;

use crate::collector::MetricsSnapshot;

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} counter\n"));
    out.push_str(&format!("{name} {value}\n"));
}

/// Render counters plus live gauges into Prometheus text format.
///
/// `occupancy` is the number of held keys per map; `robots_tracked` the
/// size of the live position cache.
pub fn render_prometheus(
    snapshot: &MetricsSnapshot,
    occupancy: &[(MapId, usize)],
    robots_tracked: usize,
) -> String {
    let mut out = String::new();

    counter(
        &mut out,
        "fleetgrid_routes_planned_total",
        "Routes planned successfully.",
        snapshot.routes_planned,
    );

    out.push_str("# HELP fleetgrid_route_failures_total Route requests that produced no route.\n");
    out.push_str("# TYPE fleetgrid_route_failures_total counter\n");
    for (reason, value) in [
        ("no_anchor", snapshot.routes_no_anchor),
        ("no_path", snapshot.routes_no_path),
        ("graph_unavailable", snapshot.routes_graph_unavailable),
    ] {
        out.push_str(&format!(
            "fleetgrid_route_failures_total{{reason=\"{reason}\"}} {value}\n"
        ));
    }

    out.push_str("# HELP fleetgrid_admissions_total Admission decisions by result.\n");
    out.push_str("# TYPE fleetgrid_admissions_total counter\n");
    out.push_str(&format!(
        "fleetgrid_admissions_total{{result=\"allow\"}} {}\n",
        snapshot.admissions_allowed
    ));
    out.push_str(&format!(
        "fleetgrid_admissions_total{{result=\"deny\"}} {}\n",
        snapshot.admissions_denied
    ));
    counter(
        &mut out,
        "fleetgrid_admissions_fail_open_total",
        "Segments allowed without a claim because they could not be resolved.",
        snapshot.admissions_fail_open,
    );

    out.push_str("# HELP fleetgrid_telemetry_total Telemetry updates by outcome.\n");
    out.push_str("# TYPE fleetgrid_telemetry_total counter\n");
    out.push_str(&format!(
        "fleetgrid_telemetry_total{{outcome=\"applied\"}} {}\n",
        snapshot.telemetry_applied
    ));
    out.push_str(&format!(
        "fleetgrid_telemetry_total{{outcome=\"out_of_order\"}} {}\n",
        snapshot.telemetry_out_of_order
    ));

    out.push_str("# HELP fleetgrid_commands_total Outbox command events.\n");
    out.push_str("# TYPE fleetgrid_commands_total counter\n");
    for (event, value) in [
        ("sent", snapshot.commands_sent),
        ("acked", snapshot.commands_acked),
        ("retried", snapshot.commands_retried),
        ("dead_lettered", snapshot.commands_dead_lettered),
    ] {
        out.push_str(&format!(
            "fleetgrid_commands_total{{event=\"{event}\"}} {value}\n"
        ));
    }
    counter(
        &mut out,
        "fleetgrid_acks_uncorrelated_total",
        "Acks that matched no pending command.",
        snapshot.acks_uncorrelated,
    );
    counter(
        &mut out,
        "fleetgrid_robots_released_total",
        "Robots whose occupancy was force-released.",
        snapshot.robots_released,
    );

    out.push_str("# HELP fleetgrid_plan_latency_p50_ms P50 planning latency in milliseconds.\n");
    out.push_str("# TYPE fleetgrid_plan_latency_p50_ms gauge\n");
    out.push_str(&format!(
        "fleetgrid_plan_latency_p50_ms {:.2}\n",
        snapshot.plan_latency_p50_ms
    ));
    out.push_str("# HELP fleetgrid_plan_latency_p99_ms P99 planning latency in milliseconds.\n");
    out.push_str("# TYPE fleetgrid_plan_latency_p99_ms gauge\n");
    out.push_str(&format!(
        "fleetgrid_plan_latency_p99_ms {:.2}\n",
        snapshot.plan_latency_p99_ms
    ));

    out.push_str("# HELP fleetgrid_occupancy_held Occupancy keys currently held.\n");
    out.push_str("# TYPE fleetgrid_occupancy_held gauge\n");
    for (map_id, held) in occupancy {
        out.push_str(&format!(
            "fleetgrid_occupancy_held{{map=\"{map_id}\"}} {held}\n"
        ));
    }

    out.push_str("# HELP fleetgrid_robots_tracked Robots in the live position cache.\n");
    out.push_str("# TYPE fleetgrid_robots_tracked gauge\n");
    out.push_str(&format!("fleetgrid_robots_tracked {robots_tracked}\n"));

    out
}
