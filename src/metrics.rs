use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::protocol::DisconnectReason;

/// Process-wide relay counters.
///
/// Routing outcomes live in [`RoutingDiagnostics`](crate::server::RoutingDiagnostics);
/// these counters cover the transport and authentication side.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Connection metrics
    pub total_connections: AtomicU64,
    pub active_connections: AtomicU64,
    pub disconnections: AtomicU64,
    pub connection_rejections: AtomicU64,
    pub transport_errors: AtomicU64,
    pub outbound_messages_dropped: AtomicU64,

    // Authentication metrics
    pub auth_successes: AtomicU64,
    pub auth_failures: AtomicU64,
    pub auth_timeouts: AtomicU64,
    pub auth_refreshes: AtomicU64,

    // Liveness metrics
    pub heartbeat_probes: AtomicU64,
    pub heartbeat_timeouts: AtomicU64,

    // Frame metrics
    pub frames_received: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub oversized_frames: AtomicU64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub connections: ConnectionMetrics,
    pub auth: AuthMetrics,
    pub liveness: LivenessMetrics,
    pub frames: FrameMetrics,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectionMetrics {
    pub total_connections: u64,
    pub active_connections: u64,
    pub disconnections: u64,
    pub connection_rejections: u64,
    pub transport_errors: u64,
    pub outbound_messages_dropped: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthMetrics {
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub refreshes: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LivenessMetrics {
    pub probes_sent: u64,
    pub timeouts: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FrameMetrics {
    pub received: u64,
    pub malformed: u64,
    pub oversized: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // Connection metrics
    pub fn increment_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection leaving the registry and attributes the reason.
    pub fn record_disconnect(&self, reason: DisconnectReason) {
        // Check-then-decrement so a stray double count cannot underflow.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_sub(1)
            });
        self.disconnections.fetch_add(1, Ordering::Relaxed);

        match reason {
            DisconnectReason::TransportError => {
                self.transport_errors.fetch_add(1, Ordering::Relaxed);
            }
            DisconnectReason::HeartbeatTimeout => {
                self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            DisconnectReason::AuthTimeout => {
                self.auth_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn increment_connection_rejections(&self) {
        self.connection_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_outbound_dropped(&self) {
        self.outbound_messages_dropped
            .fetch_add(1, Ordering::Relaxed);
    }

    // Authentication metrics
    pub fn increment_auth_successes(&self) {
        self.auth_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_auth_failures(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_auth_refreshes(&self) {
        self.auth_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_heartbeat_probes(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.heartbeat_probes.fetch_add(count, Ordering::Relaxed);
    }

    // Frame metrics
    pub fn increment_frames_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_malformed_frames(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_oversized_frames(&self) {
        self.oversized_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: chrono::Utc::now(),
            connections: ConnectionMetrics {
                total_connections: self.total_connections.load(Ordering::Relaxed),
                active_connections: self.active_connections.load(Ordering::Relaxed),
                disconnections: self.disconnections.load(Ordering::Relaxed),
                connection_rejections: self.connection_rejections.load(Ordering::Relaxed),
                transport_errors: self.transport_errors.load(Ordering::Relaxed),
                outbound_messages_dropped: self.outbound_messages_dropped.load(Ordering::Relaxed),
            },
            auth: AuthMetrics {
                successes: self.auth_successes.load(Ordering::Relaxed),
                failures: self.auth_failures.load(Ordering::Relaxed),
                timeouts: self.auth_timeouts.load(Ordering::Relaxed),
                refreshes: self.auth_refreshes.load(Ordering::Relaxed),
            },
            liveness: LivenessMetrics {
                probes_sent: self.heartbeat_probes.load(Ordering::Relaxed),
                timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
            },
            frames: FrameMetrics {
                received: self.frames_received.load(Ordering::Relaxed),
                malformed: self.malformed_frames.load(Ordering::Relaxed),
                oversized: self.oversized_frames.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct LatencyMetrics {
    pub average_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub sample_count: u64,
}

const LOWEST_DISCERNIBLE_MICROS: u64 = 1;
const HIGHEST_TRACKABLE_MICROS: u64 = 60_000_000;
const SIGNIFICANT_FIGURES: u8 = 3;
const MICROS_PER_MS: f64 = 1000.0;

/// Microsecond latency histogram. Samples above the trackable range are clamped.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    /// `None` only if every histogram construction attempt failed
    histogram: Option<Histogram<u64>>,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(
            LOWEST_DISCERNIBLE_MICROS,
            HIGHEST_TRACKABLE_MICROS,
            SIGNIFICANT_FIGURES,
        )
        .or_else(|e| {
            tracing::warn!(target: "metrics", error = %e, "Falling back to auto-resizing histogram");
            Histogram::new(2)
        })
        .ok();

        if histogram.is_none() {
            tracing::error!(target: "metrics", "Latency histogram unavailable; samples will be ignored");
        }

        Self { histogram }
    }

    pub fn record(&mut self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros())
            .unwrap_or(u64::MAX)
            .clamp(LOWEST_DISCERNIBLE_MICROS, HIGHEST_TRACKABLE_MICROS);
        if let Some(histogram) = self.histogram.as_mut() {
            if let Err(error) = histogram.record(micros) {
                tracing::warn!(target: "metrics", %error, micros, "failed to record latency sample");
            }
        }
    }

    pub fn reset(&mut self) {
        if let Some(histogram) = self.histogram.as_mut() {
            histogram.reset();
        }
    }

    pub fn metrics(&self) -> LatencyMetrics {
        let Some(histogram) = self.histogram.as_ref().filter(|h| !h.is_empty()) else {
            return LatencyMetrics::default();
        };
        let at = |percentile: f64| histogram.value_at_percentile(percentile) as f64 / MICROS_PER_MS;

        LatencyMetrics {
            average_ms: Some(histogram.mean() / MICROS_PER_MS),
            p50_ms: Some(at(50.0)),
            p95_ms: Some(at(95.0)),
            p99_ms: Some(at(99.0)),
            max_ms: Some(histogram.max() as f64 / MICROS_PER_MS),
            sample_count: histogram.len(),
        }
    }
}
