use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use smallvec::SmallVec;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::RelayMetrics;
use crate::protocol::{ConnectionId, DisconnectReason, Identity, Outbound, ServerMessage};

/// Heartbeat state of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Alive,
    /// A probe was sent and no traffic has arrived since.
    PendingAck,
}

/// Lifecycle notifications published by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Connected {
        connection_id: ConnectionId,
        client_addr: SocketAddr,
    },
    Authenticated {
        connection_id: ConnectionId,
        identity: Identity,
    },
    Disconnected {
        connection_id: ConnectionId,
        identity: Option<Identity>,
        reason: DisconnectReason,
    },
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("Too many connections from your IP ({current}/{limit})")]
    IpLimitExceeded { current: usize, limit: usize },
    #[error("relay is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection {0} is no longer registered")]
    AlreadyClosed(ConnectionId),
    #[error("connection is already authenticated as {bound}")]
    IdentityConflict { bound: Identity },
    #[error("identity {0} has no open connections")]
    NotFound(Identity),
}

/// Why an item could not be placed on a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("connection is not registered")]
    NotConnected,
    #[error("outbound queue is full")]
    QueueFull,
    #[error("outbound queue is closed")]
    Closed,
}

impl<T> From<TrySendError<T>> for DeliveryError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => Self::QueueFull,
            TrySendError::Closed(_) => Self::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// Identity newly bound and indexed.
    Bound,
    /// Connection was already bound to this identity; nothing changed.
    AlreadyBound,
}

/// Returned by [`ConnectionRegistry::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub id: ConnectionId,
    /// Cancelled when the connection is unregistered, for any reason.
    pub shutdown: CancellationToken,
}

/// A resolved delivery target.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub sender: mpsc::Sender<Outbound>,
}

pub type Recipients = SmallVec<[ConnectionHandle; 4]>;

/// Snapshot of one registered connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub identity: Option<Identity>,
    pub client_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub liveness: Liveness,
}

/// Result of removing a connection.
#[derive(Debug, Clone)]
pub struct Unregistered {
    pub identity: Option<Identity>,
    pub client_addr: SocketAddr,
}

/// Work produced by one heartbeat sweep, to be carried out outside the lock.
#[derive(Debug, Default)]
pub struct HeartbeatSweep {
    /// Connections that were already waiting on a probe.
    pub expired: Vec<ConnectionId>,
    /// Connections just moved to `PendingAck` that need a probe sent.
    pub probes: Vec<ConnectionHandle>,
}

#[derive(Debug)]
struct ConnectionEntry {
    sender: mpsc::Sender<Outbound>,
    shutdown: CancellationToken,
    identity: Option<Identity>,
    liveness: Liveness,
    last_heartbeat: Instant,
    client_addr: SocketAddr,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    identities: HashMap<Identity, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn unindex(&mut self, identity: &Identity, id: &ConnectionId) {
        if let Some(ids) = self.identities.get_mut(identity) {
            ids.remove(id);
            if ids.is_empty() {
                self.identities.remove(identity);
            }
        }
    }
}

/// Owns every live connection and the identity index.
///
/// The connection table and identity index share one lock so that a
/// connection is never visible in one and missing from the other. No await
/// happens while the lock is held.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    connections_per_ip: DashMap<IpAddr, usize>,
    max_connections_per_ip: usize,
    events: broadcast::Sender<RegistryEvent>,
    metrics: Arc<RelayMetrics>,
}

impl ConnectionRegistry {
    pub fn new(
        max_connections_per_ip: usize,
        event_buffer_size: usize,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        let (events, _) = broadcast::channel(event_buffer_size.max(1));
        Self {
            state: RwLock::new(RegistryState::default()),
            connections_per_ip: DashMap::new(),
            max_connections_per_ip,
            events,
            metrics,
        }
    }

    /// Subscribe to lifecycle events. Slow subscribers observe `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Adds an unauthenticated connection and queues the welcome frame.
    pub fn register(
        &self,
        sender: mpsc::Sender<Outbound>,
        client_addr: SocketAddr,
    ) -> Result<Registration, RegisterError> {
        let ip = client_addr.ip();
        if let Err(current) = self.try_reserve_ip_slot(ip) {
            warn!(
                %ip,
                current,
                max = self.max_connections_per_ip,
                "IP connection limit exceeded"
            );
            self.metrics.increment_connection_rejections();
            return Err(RegisterError::IpLimitExceeded {
                current,
                limit: self.max_connections_per_ip,
            });
        }

        let id = Uuid::new_v4();
        let shutdown = CancellationToken::new();

        if let Err(err) = sender.try_send(ServerMessage::welcome(id).into()) {
            debug!(connection_id = %id, error = %err, "Failed to enqueue welcome frame");
        }

        {
            let mut state = self.state.write();
            state.connections.insert(
                id,
                ConnectionEntry {
                    sender,
                    shutdown: shutdown.clone(),
                    identity: None,
                    liveness: Liveness::Alive,
                    last_heartbeat: Instant::now(),
                    client_addr,
                    connected_at: Utc::now(),
                },
            );
            let _ = self.events.send(RegistryEvent::Connected {
                connection_id: id,
                client_addr,
            });
        }

        self.metrics.increment_connections();
        info!(connection_id = %id, %client_addr, "Connection registered");
        Ok(Registration { id, shutdown })
    }

    /// Binds a verified identity to a connection and indexes it.
    pub fn bind_identity(
        &self,
        id: ConnectionId,
        identity: Identity,
    ) -> Result<BindOutcome, RegistryError> {
        let mut state = self.state.write();
        let entry = state
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::AlreadyClosed(id))?;

        match &entry.identity {
            Some(bound) if *bound == identity => return Ok(BindOutcome::AlreadyBound),
            Some(bound) => {
                return Err(RegistryError::IdentityConflict {
                    bound: bound.clone(),
                })
            }
            None => {}
        }

        entry.identity = Some(identity.clone());
        entry.liveness = Liveness::Alive;
        entry.last_heartbeat = Instant::now();
        state
            .identities
            .entry(identity.clone())
            .or_default()
            .insert(id);

        info!(connection_id = %id, %identity, "Identity bound");
        let _ = self.events.send(RegistryEvent::Authenticated {
            connection_id: id,
            identity,
        });
        Ok(BindOutcome::Bound)
    }

    /// Removes a connection. Returns `None` if it was already gone.
    ///
    /// When the reason carries a close code, a close frame is queued before
    /// the connection's shutdown token is cancelled.
    pub fn unregister(&self, id: ConnectionId, reason: DisconnectReason) -> Option<Unregistered> {
        let entry = {
            let mut state = self.state.write();
            let entry = state.connections.remove(&id)?;
            if let Some(identity) = &entry.identity {
                state.unindex(identity, &id);
            }
            let _ = self.events.send(RegistryEvent::Disconnected {
                connection_id: id,
                identity: entry.identity.clone(),
                reason,
            });
            entry
        };

        self.release_ip_slot(entry.client_addr.ip());
        self.metrics.record_disconnect(reason);

        if reason.close_code().is_some() {
            if let Err(err) = entry.sender.try_send(Outbound::Close(reason)) {
                debug!(connection_id = %id, error = %err, "Close frame not queued");
            }
        }
        entry.shutdown.cancel();

        info!(
            connection_id = %id,
            identity = entry.identity.as_ref().map(Identity::as_str),
            reason = reason.as_str(),
            "Connection unregistered"
        );

        Some(Unregistered {
            identity: entry.identity,
            client_addr: entry.client_addr,
        })
    }

    /// All open connections bound to `identity`.
    pub fn resolve(&self, identity: &Identity) -> Result<Recipients, RegistryError> {
        let state = self.state.read();
        let recipients: Recipients = state
            .identities
            .get(identity)
            .into_iter()
            .flatten()
            .filter_map(|id| {
                state.connections.get(id).map(|entry| ConnectionHandle {
                    id: *id,
                    sender: entry.sender.clone(),
                })
            })
            .collect();

        if recipients.is_empty() {
            Err(RegistryError::NotFound(identity.clone()))
        } else {
            Ok(recipients)
        }
    }

    pub fn is_online(&self, identity: &Identity) -> bool {
        self.state.read().identities.contains_key(identity)
    }

    /// Distinct identities with at least one open connection, sorted.
    pub fn online_identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> =
            self.state.read().identities.keys().cloned().collect();
        identities.sort();
        identities
    }

    pub fn identity_of(&self, id: ConnectionId) -> Option<Identity> {
        self.state
            .read()
            .connections
            .get(&id)
            .and_then(|entry| entry.identity.clone())
    }

    pub fn is_authenticated(&self, id: ConnectionId) -> bool {
        self.state
            .read()
            .connections
            .get(&id)
            .is_some_and(|entry| entry.identity.is_some())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.state.read().connections.contains_key(&id)
    }

    /// Marks inbound traffic on a connection, returning it to `Alive`.
    pub fn record_activity(&self, id: ConnectionId) {
        if let Some(entry) = self.state.write().connections.get_mut(&id) {
            entry.liveness = Liveness::Alive;
            entry.last_heartbeat = Instant::now();
        }
    }

    pub fn liveness_of(&self, id: ConnectionId) -> Option<Liveness> {
        self.state
            .read()
            .connections
            .get(&id)
            .map(|entry| entry.liveness)
    }

    /// Advances every connection's heartbeat state in one critical section.
    ///
    /// Connections still `PendingAck` from the previous sweep are reported as
    /// expired; all others move to `PendingAck` and are returned for probing.
    pub fn heartbeat_sweep(&self) -> HeartbeatSweep {
        let mut sweep = HeartbeatSweep::default();
        let mut state = self.state.write();
        for (id, entry) in state.connections.iter_mut() {
            match entry.liveness {
                Liveness::PendingAck => sweep.expired.push(*id),
                Liveness::Alive => {
                    entry.liveness = Liveness::PendingAck;
                    sweep.probes.push(ConnectionHandle {
                        id: *id,
                        sender: entry.sender.clone(),
                    });
                }
            }
        }
        sweep
    }

    /// Queues an item for a single connection.
    pub fn send_to(&self, id: ConnectionId, item: Outbound) -> Result<(), DeliveryError> {
        let sender = self
            .state
            .read()
            .connections
            .get(&id)
            .map(|entry| entry.sender.clone())
            .ok_or(DeliveryError::NotConnected)?;

        sender.try_send(item).map_err(|err| {
            if matches!(err, TrySendError::Full(_)) {
                self.metrics.increment_outbound_dropped();
            }
            DeliveryError::from(err)
        })
    }

    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Number of distinct authenticated identities.
    pub fn authenticated_count(&self) -> usize {
        self.state.read().identities.len()
    }

    pub fn connections_for(&self, identity: &Identity) -> Vec<ConnectionInfo> {
        let state = self.state.read();
        let mut infos: Vec<ConnectionInfo> = state
            .identities
            .get(identity)
            .into_iter()
            .flatten()
            .filter_map(|id| state.connections.get(id).map(|entry| info_for(*id, entry)))
            .collect();
        infos.sort_by_key(|info| info.connected_at);
        infos
    }

    pub fn connection_info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.state
            .read()
            .connections
            .get(&id)
            .map(|entry| info_for(id, entry))
    }

    /// Unregisters every connection with `reason`. Returns how many were closed.
    pub fn close_all(&self, reason: DisconnectReason) -> usize {
        let ids: Vec<ConnectionId> = self.state.read().connections.keys().copied().collect();
        ids.into_iter()
            .filter(|id| self.unregister(*id, reason).is_some())
            .count()
    }

    fn try_reserve_ip_slot(&self, ip: IpAddr) -> Result<usize, usize> {
        match self.connections_per_ip.entry(ip) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let count = entry.get_mut();
                if *count >= self.max_connections_per_ip {
                    Err(*count)
                } else {
                    *count += 1;
                    Ok(*count)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                if self.max_connections_per_ip == 0 {
                    Err(0)
                } else {
                    entry.insert(1);
                    Ok(1)
                }
            }
        }
    }

    fn release_ip_slot(&self, ip: IpAddr) {
        if let dashmap::mapref::entry::Entry::Occupied(mut entry) = self.connections_per_ip.entry(ip)
        {
            if *entry.get() > 1 {
                *entry.get_mut() -= 1;
            } else {
                entry.remove();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn ip_slots(&self, ip: IpAddr) -> usize {
        self.connections_per_ip.get(&ip).map(|v| *v).unwrap_or(0)
    }
}

fn info_for(id: ConnectionId, entry: &ConnectionEntry) -> ConnectionInfo {
    ConnectionInfo {
        connection_id: id,
        identity: entry.identity.clone(),
        client_addr: entry.client_addr,
        connected_at: entry.connected_at,
        liveness: entry.liveness,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(16, 64, Arc::new(RelayMetrics::new()))
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn connect(registry: &ConnectionRegistry) -> (Registration, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        let registration = registry.register(tx, addr(40000)).unwrap();
        (registration, rx)
    }

    #[test]
    fn register_sends_welcome_and_emits_event() {
        let registry = registry();
        let mut events = registry.subscribe();
        let (registration, mut rx) = connect(&registry);

        match rx.try_recv().unwrap() {
            Outbound::Control(message) => match message.as_ref() {
                ServerMessage::Welcome { client_id, .. } => {
                    assert_eq!(*client_id, registration.id);
                }
                other => panic!("unexpected message {other:?}"),
            },
            other => panic!("unexpected outbound {other:?}"),
        }

        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::Connected {
                connection_id: registration.id,
                client_addr: addr(40000),
            }
        );
        assert!(!registry.is_authenticated(registration.id));
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn bind_identity_is_idempotent_and_rejects_conflicts() {
        let registry = registry();
        let (registration, _rx) = connect(&registry);
        let alice = Identity::from("alice");

        assert_eq!(
            registry.bind_identity(registration.id, alice.clone()),
            Ok(BindOutcome::Bound)
        );
        assert_eq!(
            registry.bind_identity(registration.id, alice.clone()),
            Ok(BindOutcome::AlreadyBound)
        );
        assert_eq!(
            registry.bind_identity(registration.id, Identity::from("bob")),
            Err(RegistryError::IdentityConflict {
                bound: alice.clone()
            })
        );
        assert_eq!(registry.identity_of(registration.id), Some(alice));
        assert!(!registry.is_online(&Identity::from("bob")));
    }

    #[test]
    fn bind_after_close_fails() {
        let registry = registry();
        let (registration, _rx) = connect(&registry);
        registry.unregister(registration.id, DisconnectReason::ClientClosed);
        assert_eq!(
            registry.bind_identity(registration.id, Identity::from("alice")),
            Err(RegistryError::AlreadyClosed(registration.id))
        );
        assert!(!registry.is_online(&Identity::from("alice")));
    }

    #[test]
    fn multiple_connections_share_one_identity() {
        let registry = registry();
        let (first, _rx1) = connect(&registry);
        let (second, _rx2) = connect(&registry);
        let alice = Identity::from("alice");
        registry.bind_identity(first.id, alice.clone()).unwrap();
        registry.bind_identity(second.id, alice.clone()).unwrap();

        assert_eq!(registry.authenticated_count(), 1);
        assert_eq!(registry.resolve(&alice).unwrap().len(), 2);
        assert_eq!(registry.online_identities(), vec![alice.clone()]);

        registry.unregister(first.id, DisconnectReason::ClientClosed);
        assert!(registry.is_online(&alice));
        assert_eq!(registry.resolve(&alice).unwrap().len(), 1);

        registry.unregister(second.id, DisconnectReason::ClientClosed);
        assert!(!registry.is_online(&alice));
        assert_eq!(
            registry.resolve(&alice).unwrap_err(),
            RegistryError::NotFound(alice)
        );
    }

    #[test]
    fn unregister_is_idempotent_and_reports_identity() {
        let registry = registry();
        let mut events = registry.subscribe();
        let (registration, _rx) = connect(&registry);
        registry
            .bind_identity(registration.id, Identity::from("alice"))
            .unwrap();

        let removed = registry
            .unregister(registration.id, DisconnectReason::ClientClosed)
            .unwrap();
        assert_eq!(removed.identity, Some(Identity::from("alice")));
        assert!(registry
            .unregister(registration.id, DisconnectReason::ClientClosed)
            .is_none());
        assert!(registration.shutdown.is_cancelled());

        let events: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            RegistryEvent::Disconnected {
                connection_id: registration.id,
                identity: Some(Identity::from("alice")),
                reason: DisconnectReason::ClientClosed,
            }
        );
    }

    #[test]
    fn server_initiated_close_queues_close_frame() {
        let registry = registry();
        let (registration, mut rx) = connect(&registry);
        let _welcome = rx.try_recv().unwrap();

        registry.unregister(registration.id, DisconnectReason::HeartbeatTimeout);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Outbound::Close(DisconnectReason::HeartbeatTimeout)
        ));
    }

    #[test]
    fn client_close_does_not_queue_close_frame() {
        let registry = registry();
        let (registration, mut rx) = connect(&registry);
        let _welcome = rx.try_recv().unwrap();

        registry.unregister(registration.id, DisconnectReason::ClientClosed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ip_limit_is_enforced_and_released() {
        let registry = ConnectionRegistry::new(2, 16, Arc::new(RelayMetrics::new()));
        let ip = addr(1).ip();
        let (first, _rx1) = connect(&registry);
        let (_second, _rx2) = connect(&registry);

        let (tx, _rx3) = mpsc::channel(4);
        assert!(matches!(
            registry.register(tx, addr(40001)),
            Err(RegisterError::IpLimitExceeded {
                current: 2,
                limit: 2
            })
        ));
        assert_eq!(registry.ip_slots(ip), 2);

        registry.unregister(first.id, DisconnectReason::ClientClosed);
        assert_eq!(registry.ip_slots(ip), 1);
        let (tx, _rx4) = mpsc::channel(4);
        assert!(registry.register(tx, addr(40002)).is_ok());
    }

    #[test]
    fn heartbeat_sweep_probes_then_expires() {
        let registry = registry();
        let (quiet, _rx1) = connect(&registry);
        let (chatty, _rx2) = connect(&registry);

        let first = registry.heartbeat_sweep();
        assert!(first.expired.is_empty());
        assert_eq!(first.probes.len(), 2);
        assert_eq!(registry.liveness_of(quiet.id), Some(Liveness::PendingAck));

        registry.record_activity(chatty.id);

        let second = registry.heartbeat_sweep();
        assert_eq!(second.expired, vec![quiet.id]);
        assert_eq!(second.probes.len(), 1);
        assert_eq!(second.probes[0].id, chatty.id);
    }

    #[test]
    fn close_all_drains_registry() {
        let registry = registry();
        let (_a, _rx1) = connect(&registry);
        let (_b, _rx2) = connect(&registry);
        assert_eq!(registry.close_all(DisconnectReason::ServerShutdown), 2);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.close_all(DisconnectReason::ServerShutdown), 0);
    }

    #[test]
    fn send_to_reports_full_queue() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(1);
        let registration = registry.register(tx, addr(40003)).unwrap();
        // The welcome frame already fills the single slot.
        assert_eq!(
            registry.send_to(registration.id, ServerMessage::Ping.into()),
            Err(DeliveryError::QueueFull)
        );
        assert_eq!(
            registry.send_to(Uuid::new_v4(), ServerMessage::Ping.into()),
            Err(DeliveryError::NotConnected)
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Connect,
        Bind(usize, usize),
        Disconnect(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Connect),
            (0usize..8, 0usize..3).prop_map(|(c, i)| Op::Bind(c, i)),
            (0usize..8).prop_map(Op::Disconnect),
        ]
    }

    proptest! {
        #[test]
        fn online_identities_match_open_authenticated_connections(
            ops in proptest::collection::vec(op_strategy(), 1..60)
        ) {
            let registry = ConnectionRegistry::new(usize::MAX, 1024, Arc::new(RelayMetrics::new()));
            let names = ["alice", "bob", "carol"];
            let mut opened: Vec<ConnectionId> = Vec::new();
            let mut model: HashMap<ConnectionId, Option<&str>> = HashMap::new();
            let mut receivers = Vec::new();

            for op in ops {
                match op {
                    Op::Connect => {
                        let (tx, rx) = mpsc::channel(8);
                        let registration = registry.register(tx, addr(5000)).unwrap();
                        opened.push(registration.id);
                        model.insert(registration.id, None);
                        receivers.push(rx);
                    }
                    Op::Bind(conn, name) => {
                        let Some(id) = opened.get(conn).copied() else { continue };
                        let result = registry.bind_identity(id, Identity::from(names[name]));
                        match model.get(&id).copied() {
                            None => prop_assert!(result.is_err()),
                            Some(None) => {
                                prop_assert_eq!(result, Ok(BindOutcome::Bound));
                                model.insert(id, Some(names[name]));
                            }
                            Some(Some(bound)) if bound == names[name] => {
                                prop_assert_eq!(result, Ok(BindOutcome::AlreadyBound));
                            }
                            Some(Some(_)) => prop_assert!(result.is_err()),
                        }
                    }
                    Op::Disconnect(conn) => {
                        let Some(id) = opened.get(conn).copied() else { continue };
                        let removed = registry.unregister(id, DisconnectReason::ClientClosed);
                        prop_assert_eq!(removed.is_some(), model.remove(&id).is_some());
                    }
                }

                let expected: BTreeSet<&str> = model.values().flatten().copied().collect();
                let actual: BTreeSet<String> = registry
                    .online_identities()
                    .into_iter()
                    .map(Identity::into_inner)
                    .collect();
                prop_assert_eq!(
                    actual.iter().map(String::as_str).collect::<BTreeSet<_>>(),
                    expected
                );
                prop_assert_eq!(registry.connection_count(), model.len());
            }
        }
    }
}
