use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::metrics::{LatencyHistogram, LatencyMetrics};
use crate::protocol::{Identity, SignalKind};

/// Why a routing attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingFailure {
    UnknownKind,
    IdentityMismatch,
    TargetOffline,
}

/// One routing attempt, kept in a bounded ring for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRecord {
    pub from: Identity,
    pub to: String,
    /// Envelope `type` exactly as received, so unknown kinds stay visible
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<RoutingFailure>,
}

impl RoutingRecord {
    pub fn delivered(from: Identity, to: &str, kind: &str) -> Self {
        Self {
            from,
            to: to.to_owned(),
            kind: kind.to_owned(),
            timestamp: Utc::now(),
            success: true,
            failure_reason: None,
        }
    }

    pub fn failed(from: Identity, to: &str, kind: &str, reason: RoutingFailure) -> Self {
        Self {
            success: false,
            failure_reason: Some(reason),
            ..Self::delivered(from, to, kind)
        }
    }
}

/// Monotonic routing counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingStats {
    pub total_messages: u64,
    pub successful_routes: u64,
    pub failed_routes: u64,
    pub offline_targets: u64,
    pub messages_by_type: BTreeMap<SignalKind, u64>,
}

impl Default for RoutingStats {
    fn default() -> Self {
        Self {
            total_messages: 0,
            successful_routes: 0,
            failed_routes: 0,
            offline_targets: 0,
            messages_by_type: SignalKind::ALL.into_iter().map(|kind| (kind, 0)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSnapshot {
    #[serde(flatten)]
    pub stats: RoutingStats,
    /// Fraction of attempts delivered; 1.0 before any traffic
    pub success_rate: f64,
    pub latency: LatencyMetrics,
}

struct Inner {
    stats: RoutingStats,
    history: VecDeque<RoutingRecord>,
    latency: LatencyHistogram,
}

/// Routing counters, recent history, and routing latency.
///
/// A single mutex covers all three so a snapshot never sees a counter bump
/// without its matching history entry.
pub struct RoutingDiagnostics {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl RoutingDiagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                stats: RoutingStats::default(),
                history: VecDeque::with_capacity(capacity.min(1024)),
                latency: LatencyHistogram::new(),
            }),
            capacity,
        }
    }

    /// Records one attempt. `kind` is `None` for envelope types outside the
    /// known set; those count toward totals but not toward any per-kind bucket.
    pub fn record(&self, record: RoutingRecord, kind: Option<SignalKind>, elapsed: Duration) {
        let mut inner = self.inner.lock();
        let stats = &mut inner.stats;
        stats.total_messages += 1;
        if let Some(kind) = kind {
            *stats.messages_by_type.entry(kind).or_insert(0) += 1;
        }
        if record.success {
            stats.successful_routes += 1;
        } else {
            stats.failed_routes += 1;
            if record.failure_reason == Some(RoutingFailure::TargetOffline) {
                stats.offline_targets += 1;
            }
        }

        inner.latency.record(elapsed);

        if self.capacity == 0 {
            return;
        }
        if inner.history.len() >= self.capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(record);
    }

    pub fn stats(&self) -> RoutingStats {
        self.inner.lock().stats.clone()
    }

    pub fn snapshot(&self) -> RoutingSnapshot {
        let inner = self.inner.lock();
        let stats = inner.stats.clone();
        let success_rate = if stats.total_messages == 0 {
            1.0
        } else {
            stats.successful_routes as f64 / stats.total_messages as f64
        };
        RoutingSnapshot {
            stats,
            success_rate,
            latency: inner.latency.metrics(),
        }
    }

    /// The `limit` most recent records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<RoutingRecord> {
        let inner = self.inner.lock();
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    /// Operator reset: zeroes counters and latency, clears history.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.stats = RoutingStats::default();
        inner.history.clear();
        inner.latency.reset();
    }
}
