use crate::metrics::{LatencyMetrics, MetricsSnapshot};
use crate::server::RoutingSnapshot;

/// Render relay metrics and routing statistics into Prometheus text exposition format.
pub(crate) fn render_prometheus_metrics(
    snapshot: &MetricsSnapshot,
    routing: &RoutingSnapshot,
    online_identities: usize,
) -> String {
    use std::fmt::Write;

    fn write_metric(buf: &mut String, name: &str, help: &str, metric_type: &str, value: f64) {
        let _ = writeln!(buf, "# HELP {name} {help}");
        let _ = writeln!(buf, "# TYPE {name} {metric_type}");
        let _ = writeln!(buf, "{name} {value}");
    }

    fn counter(buf: &mut String, name: &str, help: &str, value: u64) {
        write_metric(buf, name, help, "counter", value as f64);
    }

    fn gauge(buf: &mut String, name: &str, help: &str, value: u64) {
        write_metric(buf, name, help, "gauge", value as f64);
    }

    fn gauge_f64(buf: &mut String, name: &str, help: &str, value: f64) {
        write_metric(buf, name, help, "gauge", value);
    }

    fn emit_latency_metrics(buf: &mut String, metric_prefix: &str, metrics: &LatencyMetrics) {
        let quantiles = [
            ("average", metrics.average_ms),
            ("p50", metrics.p50_ms),
            ("p95", metrics.p95_ms),
            ("p99", metrics.p99_ms),
            ("max", metrics.max_ms),
        ];
        for (label, value) in quantiles {
            if let Some(value) = value {
                gauge_f64(
                    buf,
                    &format!("{metric_prefix}_{label}_ms"),
                    &format!("{label} routing latency in milliseconds"),
                    value,
                );
            }
        }
        counter(
            buf,
            &format!("{metric_prefix}_samples_total"),
            "Total samples recorded for routing latency calculations",
            metrics.sample_count,
        );
    }

    let mut buf = String::new();

    counter(
        &mut buf,
        "peerlink_connections_total",
        "Total connections accepted since startup",
        snapshot.connections.total_connections,
    );
    gauge(
        &mut buf,
        "peerlink_connections_active",
        "Number of currently registered connections",
        snapshot.connections.active_connections,
    );
    counter(
        &mut buf,
        "peerlink_connections_disconnections_total",
        "Total connection closures observed since startup",
        snapshot.connections.disconnections,
    );
    counter(
        &mut buf,
        "peerlink_connections_rejected_total",
        "Connections refused by the per-address limit",
        snapshot.connections.connection_rejections,
    );
    counter(
        &mut buf,
        "peerlink_transport_errors_total",
        "Connections evicted because of a transport failure",
        snapshot.connections.transport_errors,
    );
    counter(
        &mut buf,
        "peerlink_outbound_messages_dropped_total",
        "Messages dropped because a connection's outbound queue was full or closed",
        snapshot.connections.outbound_messages_dropped,
    );
    gauge(
        &mut buf,
        "peerlink_online_identities",
        "Distinct identities with at least one authenticated connection",
        online_identities as u64,
    );

    counter(
        &mut buf,
        "peerlink_auth_successes_total",
        "Credentials accepted",
        snapshot.auth.successes,
    );
    counter(
        &mut buf,
        "peerlink_auth_failures_total",
        "Credentials rejected",
        snapshot.auth.failures,
    );
    counter(
        &mut buf,
        "peerlink_auth_timeouts_total",
        "Connections closed for not authenticating in time",
        snapshot.auth.timeouts,
    );
    counter(
        &mut buf,
        "peerlink_auth_refreshes_total",
        "Successful credential refreshes",
        snapshot.auth.refreshes,
    );

    counter(
        &mut buf,
        "peerlink_heartbeat_probes_total",
        "Heartbeat probes sent",
        snapshot.liveness.probes_sent,
    );
    counter(
        &mut buf,
        "peerlink_heartbeat_timeouts_total",
        "Connections evicted for missing a heartbeat",
        snapshot.liveness.timeouts,
    );

    counter(
        &mut buf,
        "peerlink_frames_received_total",
        "Inbound text frames received",
        snapshot.frames.received,
    );
    counter(
        &mut buf,
        "peerlink_frames_malformed_total",
        "Inbound frames dropped because they could not be decoded",
        snapshot.frames.malformed,
    );
    counter(
        &mut buf,
        "peerlink_frames_oversized_total",
        "Inbound frames dropped for exceeding the size limit",
        snapshot.frames.oversized,
    );

    counter(
        &mut buf,
        "peerlink_routing_messages_total",
        "Routing attempts by authenticated connections",
        routing.stats.total_messages,
    );
    counter(
        &mut buf,
        "peerlink_routing_success_total",
        "Signaling messages delivered",
        routing.stats.successful_routes,
    );
    counter(
        &mut buf,
        "peerlink_routing_failures_total",
        "Signaling messages rejected or undeliverable",
        routing.stats.failed_routes,
    );
    counter(
        &mut buf,
        "peerlink_routing_offline_targets_total",
        "Signaling messages addressed to an offline identity",
        routing.stats.offline_targets,
    );
    gauge_f64(
        &mut buf,
        "peerlink_routing_success_rate",
        "Fraction of routing attempts delivered",
        routing.success_rate,
    );

    let _ = writeln!(
        buf,
        "# HELP peerlink_routing_messages_by_type_total Routing attempts per signaling message type"
    );
    let _ = writeln!(buf, "# TYPE peerlink_routing_messages_by_type_total counter");
    for (kind, count) in &routing.stats.messages_by_type {
        let _ = writeln!(
            buf,
            "peerlink_routing_messages_by_type_total{{type=\"{}\"}} {count}",
            kind.as_str()
        );
    }

    emit_latency_metrics(&mut buf, "peerlink_routing_latency", &routing.latency);

    buf
}
