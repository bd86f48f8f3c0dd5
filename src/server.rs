use crate::auth::{AuthError, AuthGate};
use crate::config::Config;
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crate::protocol::{
    parse_inbound, ClientControl, ConnectionId, DisconnectReason, ErrorCode, Identity,
    InboundFrame, Outbound, ServerMessage,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

mod diagnostics;
mod liveness;
mod presence;
mod registry;
mod router;

pub use diagnostics::{
    RoutingDiagnostics, RoutingFailure, RoutingRecord, RoutingSnapshot, RoutingStats,
};
pub use liveness::{LivenessMonitor, TickReport};
pub use presence::{PresenceStatus, PresenceTracker};
pub use registry::{
    BindOutcome, ConnectionHandle, ConnectionInfo, ConnectionRegistry, DeliveryError, Liveness,
    Recipients, RegisterError, Registration, RegistryError, RegistryEvent, Unregistered,
};
pub use router::{RouteOutcome, RoutingError, SignalRouter};

/// Default number of routing records returned by [`RelayServer::stats_snapshot`].
pub const DEFAULT_RECENT_RECORDS: usize = 50;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub heartbeat_interval: Duration,
    pub auth_timeout: Duration,
    pub max_message_size: usize,
    pub max_connections_per_ip: usize,
    pub outbound_queue_capacity: usize,
    pub routing_history_capacity: usize,
    pub event_buffer_size: usize,
    pub presence_capacity: usize,
    pub require_metrics_auth: bool,
    pub metrics_auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(10),
            max_message_size: 65536, // 64KB
            max_connections_per_ip: 10,
            outbound_queue_capacity: 256,
            routing_history_capacity: 1000,
            event_buffer_size: 256,
            presence_capacity: 10_000,
            require_metrics_auth: true,
            metrics_auth_token: None,
        }
    }
}

impl ServerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.relay.heartbeat_interval_secs),
            auth_timeout: Duration::from_secs(config.websocket.auth_timeout_secs),
            max_message_size: config.websocket.max_message_size,
            max_connections_per_ip: config.security.max_connections_per_ip,
            outbound_queue_capacity: config.relay.outbound_queue_capacity,
            routing_history_capacity: config.relay.routing_history_capacity,
            event_buffer_size: config.relay.event_buffer_size,
            presence_capacity: config.relay.presence_capacity,
            require_metrics_auth: config.security.require_metrics_auth,
            metrics_auth_token: config.security.metrics_auth_token.clone(),
        }
    }
}

/// Result of an `auth` or `auth-refresh` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(Identity),
    /// Credential refused; the connection has been closed with 4001.
    Rejected(AuthError),
    /// The connection is already bound to a different identity. It stays open.
    Conflict { bound: Identity },
    /// The connection went away while the credential was being checked.
    Closed,
}

/// Body of `GET /stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySnapshot {
    pub total_connections: usize,
    pub authenticated_users: usize,
    pub online_identities: Vec<Identity>,
    pub routing: RoutingSnapshot,
    pub recent_routing_records: Vec<RoutingRecord>,
    pub server: MetricsSnapshot,
}

/// The signaling relay: registry, authentication, liveness and routing
/// behind one handle shared by every connection task.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    diagnostics: Arc<RoutingDiagnostics>,
    router: SignalRouter,
    gate: AuthGate,
    presence: Arc<PresenceTracker>,
    pub(crate) metrics: Arc<RelayMetrics>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig, gate: AuthGate) -> Arc<Self> {
        let metrics = Arc::new(RelayMetrics::new());
        let registry = Arc::new(ConnectionRegistry::new(
            config.max_connections_per_ip,
            config.event_buffer_size,
            metrics.clone(),
        ));
        let diagnostics = Arc::new(RoutingDiagnostics::new(config.routing_history_capacity));
        let router = SignalRouter::new(registry.clone(), diagnostics.clone(), metrics.clone());
        let presence = Arc::new(PresenceTracker::new(config.presence_capacity));

        Arc::new(Self {
            config,
            registry,
            diagnostics,
            router,
            gate,
            presence,
            metrics,
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the liveness monitor and presence tracker. Calling it again
    /// while they are running is a no-op.
    pub fn start(&self) {
        let mut background = self.background.lock();
        if !background.is_empty() || self.shutdown.is_cancelled() {
            return;
        }

        let presence = self
            .presence
            .clone()
            .spawn(self.registry.subscribe(), self.shutdown.child_token());
        let monitor = LivenessMonitor::new(
            self.registry.clone(),
            self.metrics.clone(),
            self.config.heartbeat_interval,
        )
        .spawn(self.shutdown.child_token());

        background.push(monitor);
        background.push(presence);
        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval.as_secs(),
            "Relay background tasks started"
        );
    }

    /// Stops background tasks, then closes every connection with 1001.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.background.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "Background task ended abnormally");
            }
        }
        let closed = self.registry.close_all(DisconnectReason::ServerShutdown);
        tracing::info!(closed, "Relay shut down");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Register a new transport connection. Refused once shutdown has begun.
    pub fn register_connection(
        &self,
        sender: mpsc::Sender<Outbound>,
        client_addr: SocketAddr,
    ) -> Result<Registration, RegisterError> {
        if self.is_shutting_down() {
            return Err(RegisterError::ShuttingDown);
        }
        self.registry.register(sender, client_addr)
    }

    /// Verifies a credential and binds the resulting identity.
    pub async fn authenticate(
        &self,
        id: ConnectionId,
        credential: Option<&str>,
        claimed: Option<&str>,
    ) -> AuthOutcome {
        if !self.registry.contains(id) {
            return AuthOutcome::Closed;
        }

        let identity = match self.gate.verify_claim(credential, claimed).await {
            Ok(identity) => identity,
            Err(err) => return self.reject_credential(id, err),
        };

        match self.registry.bind_identity(id, identity.clone()) {
            Ok(BindOutcome::Bound) => {
                self.metrics.increment_auth_successes();
                self.reply(id, ServerMessage::auth_success(identity.clone()));
                AuthOutcome::Authenticated(identity)
            }
            Ok(BindOutcome::AlreadyBound) => {
                self.reply(id, ServerMessage::auth_success(identity.clone()));
                AuthOutcome::Authenticated(identity)
            }
            Err(RegistryError::IdentityConflict { bound }) => {
                tracing::warn!(
                    connection_id = %id,
                    %bound,
                    requested = %identity,
                    "Refusing to rebind authenticated connection"
                );
                self.reply(
                    id,
                    ServerMessage::error(
                        ErrorCode::IdentityConflict,
                        format!("connection is already authenticated as {bound}"),
                    ),
                );
                AuthOutcome::Conflict { bound }
            }
            Err(err) => {
                tracing::debug!(connection_id = %id, error = %err, "Connection closed during authentication");
                AuthOutcome::Closed
            }
        }
    }

    /// Re-verifies an authenticated connection with a fresh credential.
    ///
    /// Unauthenticated connections are treated as a first `auth`.
    pub async fn refresh(&self, id: ConnectionId, credential: Option<&str>) -> AuthOutcome {
        let Some(bound) = self.registry.identity_of(id) else {
            return self.authenticate(id, credential, None).await;
        };

        match self.gate.verify_claim(credential, Some(bound.as_str())).await {
            Ok(_) => {
                if !self.registry.contains(id) {
                    return AuthOutcome::Closed;
                }
                self.metrics.increment_auth_refreshes();
                tracing::info!(connection_id = %id, identity = %bound, "Credential refreshed");
                self.reply(id, ServerMessage::auth_success(bound.clone()));
                AuthOutcome::Authenticated(bound)
            }
            Err(err) => self.reject_credential(id, err),
        }
    }

    fn reject_credential(&self, id: ConnectionId, err: AuthError) -> AuthOutcome {
        self.metrics.increment_auth_failures();
        tracing::warn!(connection_id = %id, kind = err.kind(), error = %err, "Authentication failed");
        self.reply(id, ServerMessage::auth_error(err.code(), err.to_string()));
        self.registry.unregister(id, DisconnectReason::AuthFailed);
        AuthOutcome::Rejected(err)
    }

    /// Closes a connection that never authenticated. Returns `false` if it
    /// authenticated or closed in the meantime.
    pub fn expire_unauthenticated(&self, id: ConnectionId) -> bool {
        if !self.registry.contains(id) || self.registry.is_authenticated(id) {
            return false;
        }
        tracing::warn!(
            connection_id = %id,
            timeout_secs = self.config.auth_timeout.as_secs(),
            "Authentication timeout, closing connection"
        );
        self.reply(
            id,
            ServerMessage::error(
                ErrorCode::AuthenticationTimeout,
                format!(
                    "Authentication timeout - must authenticate within {} seconds",
                    self.config.auth_timeout.as_secs()
                ),
            ),
        );
        self.registry
            .unregister(id, DisconnectReason::AuthTimeout)
            .is_some()
    }

    /// Handles one inbound text frame. Never closes the connection for a
    /// bad frame; only a failed `auth`/`auth-refresh` does.
    pub async fn handle_text_frame(&self, id: ConnectionId, text: &str) {
        self.registry.record_activity(id);
        self.metrics.increment_frames_received();

        if text.len() > self.config.max_message_size {
            self.metrics.increment_oversized_frames();
            tracing::warn!(
                connection_id = %id,
                size = text.len(),
                max = self.config.max_message_size,
                "Message exceeds size limit"
            );
            self.reply(
                id,
                ServerMessage::error(
                    ErrorCode::MessageTooLarge,
                    format!(
                        "Message too large ({} bytes, max {} bytes)",
                        text.len(),
                        self.config.max_message_size
                    ),
                ),
            );
            return;
        }

        let frame = match parse_inbound(text) {
            Ok(frame) => frame,
            Err(err) => {
                self.reject_frame(id, &err);
                return;
            }
        };

        match frame {
            InboundFrame::Control(ClientControl::Auth { token, user_id }) => {
                self.authenticate(id, token.as_deref(), user_id.as_deref())
                    .await;
            }
            InboundFrame::Control(ClientControl::AuthRefresh { token }) => {
                self.refresh(id, token.as_deref()).await;
            }
            InboundFrame::Control(ClientControl::Ping) => {
                self.reply(id, ServerMessage::Pong);
            }
            InboundFrame::Control(ClientControl::Pong) => {}
            InboundFrame::Signal(envelope) => {
                self.router.route(id, &envelope);
            }
        }
    }

    /// Counts and answers a frame that could not be decoded.
    pub fn reject_frame(&self, id: ConnectionId, err: &dyn std::fmt::Display) {
        self.metrics.increment_malformed_frames();
        tracing::warn!(connection_id = %id, error = %err, "Rejected client WebSocket frame");
        self.reply(
            id,
            ServerMessage::error(ErrorCode::MalformedFrame, err.to_string()),
        );
    }

    /// Marks inbound traffic that carries no relay message (protocol-level
    /// ping and pong frames).
    pub fn record_activity(&self, id: ConnectionId) {
        self.registry.record_activity(id);
    }

    pub fn disconnect(&self, id: ConnectionId, reason: DisconnectReason) -> Option<Unregistered> {
        self.registry.unregister(id, reason)
    }

    fn reply(&self, id: ConnectionId, message: ServerMessage) {
        if let Err(err) = self.registry.send_to(id, message.into()) {
            tracing::debug!(connection_id = %id, error = %err, "Failed to enqueue reply");
        }
    }

    pub fn presence(&self, identity: &Identity) -> PresenceStatus {
        self.presence.status(&self.registry, identity)
    }

    pub fn stats_snapshot(&self, recent_limit: usize) -> RelaySnapshot {
        RelaySnapshot {
            total_connections: self.registry.connection_count(),
            authenticated_users: self.registry.authenticated_count(),
            online_identities: self.registry.online_identities(),
            routing: self.diagnostics.snapshot(),
            recent_routing_records: self.diagnostics.recent(recent_limit),
            server: self.metrics.snapshot(),
        }
    }

    pub fn reset_stats(&self) {
        self.diagnostics.reset();
        tracing::info!("Routing statistics reset");
    }

    pub fn health_check(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &SignalRouter {
        &self.router
    }

    pub fn diagnostics(&self) -> &Arc<RoutingDiagnostics> {
        &self.diagnostics
    }

    /// Get server metrics
    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.metrics.clone()
    }
}
