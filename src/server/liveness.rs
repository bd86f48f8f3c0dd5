use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::ConnectionRegistry;
use crate::metrics::RelayMetrics;
use crate::protocol::{DisconnectReason, Outbound, ServerMessage};

/// Outcome of a single heartbeat tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub probed: usize,
    pub evicted: usize,
}

/// Periodically probes connections and evicts those that stay silent.
///
/// Fixed cadence, no per-connection staggering. A connection that has not
/// produced any inbound traffic between two consecutive ticks is closed with
/// [`DisconnectReason::HeartbeatTimeout`].
pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<RelayMetrics>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<RelayMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            metrics,
            interval,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        // First tick one full interval after start, not immediately.
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs_f64(), "Liveness monitor started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.tick();
                    if report.evicted > 0 {
                        info!(evicted = report.evicted, probed = report.probed, "Heartbeat sweep evicted connections");
                    } else {
                        debug!(probed = report.probed, "Heartbeat sweep");
                    }
                }
            }
        }

        info!("Liveness monitor stopped");
    }

    /// Runs one sweep: evicts connections still awaiting the previous probe
    /// and probes the rest.
    pub fn tick(&self) -> TickReport {
        let sweep = self.registry.heartbeat_sweep();
        let mut report = TickReport::default();

        for id in sweep.expired {
            if self
                .registry
                .unregister(id, DisconnectReason::HeartbeatTimeout)
                .is_some()
            {
                report.evicted += 1;
            }
        }

        for probe in sweep.probes {
            match probe.sender.try_send(Outbound::from(ServerMessage::Ping)) {
                Ok(()) => report.probed += 1,
                Err(err) => {
                    debug!(connection_id = %probe.id, error = %err, "Heartbeat probe undeliverable");
                    self.metrics.increment_outbound_dropped();
                    if self
                        .registry
                        .unregister(probe.id, DisconnectReason::TransportError)
                        .is_some()
                    {
                        report.evicted += 1;
                    }
                }
            }
        }

        self.metrics.add_heartbeat_probes(report.probed as u64);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Identity;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<ConnectionRegistry>, LivenessMonitor) {
        let metrics = Arc::new(RelayMetrics::new());
        let registry = Arc::new(ConnectionRegistry::new(8, 32, metrics.clone()));
        let monitor = LivenessMonitor::new(registry.clone(), metrics, Duration::from_secs(30));
        (registry, monitor)
    }

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 41000))
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn silent_connection_is_evicted_on_second_tick() {
        let (registry, monitor) = setup();
        let (tx, mut rx) = mpsc::channel(8);
        let registration = registry.register(tx, addr()).unwrap();
        registry
            .bind_identity(registration.id, Identity::from("dave"))
            .unwrap();
        drain(&mut rx);

        assert_eq!(
            monitor.tick(),
            TickReport {
                probed: 1,
                evicted: 0
            }
        );
        let sent = drain(&mut rx);
        assert!(matches!(
            sent.as_slice(),
            [Outbound::Control(message)] if **message == ServerMessage::Ping
        ));

        assert_eq!(
            monitor.tick(),
            TickReport {
                probed: 0,
                evicted: 1
            }
        );
        assert!(!registry.is_online(&Identity::from("dave")));
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [Outbound::Close(DisconnectReason::HeartbeatTimeout)]
        ));
    }

    #[test]
    fn activity_between_ticks_keeps_connection() {
        let (registry, monitor) = setup();
        let (tx, _rx) = mpsc::channel(8);
        let registration = registry.register(tx, addr()).unwrap();

        for _ in 0..4 {
            monitor.tick();
            registry.record_activity(registration.id);
        }
        assert!(registry.contains(registration.id));
    }

    #[test]
    fn closed_queue_on_probe_is_a_transport_error() {
        let (registry, monitor) = setup();
        let (tx, rx) = mpsc::channel(8);
        let registration = registry.register(tx, addr()).unwrap();
        drop(rx);

        let report = monitor.tick();
        assert_eq!(report.evicted, 1);
        assert!(!registry.contains(registration.id));
    }

    #[tokio::test(start_paused = true)]
    async fn run_evicts_after_two_intervals_and_stops_on_cancel() {
        let (registry, monitor) = setup();
        let (tx, _rx) = mpsc::channel(8);
        let registration = registry.register(tx, addr()).unwrap();

        let shutdown = CancellationToken::new();
        let handle = monitor.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(registry.contains(registration.id));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!registry.contains(registration.id));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
