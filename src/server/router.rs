use std::sync::Arc;
use std::time::Instant;

use smallvec::SmallVec;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::diagnostics::{RoutingDiagnostics, RoutingFailure, RoutingRecord};
use super::registry::ConnectionRegistry;
use crate::metrics::RelayMetrics;
use crate::protocol::{
    ConnectionId, DisconnectReason, ErrorCode, Identity, Outbound, ServerMessage, SignalEnvelope,
    SignalKind,
};

/// Why a signaling message was not forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("sender has not authenticated")]
    Unauthenticated,
    #[error("unsupported message type `{0}`")]
    UnknownKind(String),
    #[error("`from` does not match the authenticated identity {expected}")]
    IdentityMismatch {
        expected: Identity,
        claimed: Option<String>,
    },
    #[error("recipient {0} is offline")]
    TargetOffline(String),
}

impl RoutingError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Unauthenticated => Some(ErrorCode::Unauthenticated),
            Self::UnknownKind(_) => Some(ErrorCode::UnknownKind),
            Self::IdentityMismatch { .. } => Some(ErrorCode::IdentityMismatch),
            // Answered with a dedicated `target-offline` frame instead.
            Self::TargetOffline(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered {
        /// Connections the frame was queued on
        recipients: usize,
        /// Connections whose queue was full or closed and were evicted
        evicted: usize,
    },
    Rejected(RoutingError),
}

/// Validates, resolves and forwards signaling envelopes.
///
/// Holds no per-message state: every call reads the registry and writes one
/// diagnostics entry. Callers on the same connection route sequentially, and
/// each recipient's outbound queue is FIFO, so frames between one pair of
/// connections keep their order.
pub struct SignalRouter {
    registry: Arc<ConnectionRegistry>,
    diagnostics: Arc<RoutingDiagnostics>,
    metrics: Arc<RelayMetrics>,
}

impl SignalRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        diagnostics: Arc<RoutingDiagnostics>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            registry,
            diagnostics,
            metrics,
        }
    }

    pub fn route(&self, origin: ConnectionId, envelope: &SignalEnvelope) -> RouteOutcome {
        let started = Instant::now();

        // Unauthenticated traffic never reaches the statistics.
        let Some(sender) = self.registry.identity_of(origin) else {
            let err = RoutingError::Unauthenticated;
            self.reply_error(origin, &err);
            return RouteOutcome::Rejected(err);
        };

        let kind = match envelope.kind.parse::<SignalKind>() {
            Ok(kind) => kind,
            Err(_) => {
                let err = RoutingError::UnknownKind(envelope.kind.clone());
                self.diagnostics.record(
                    RoutingRecord::failed(
                        sender,
                        &envelope.to,
                        &envelope.kind,
                        RoutingFailure::UnknownKind,
                    ),
                    None,
                    started.elapsed(),
                );
                self.reply_error(origin, &err);
                return RouteOutcome::Rejected(err);
            }
        };

        if envelope.from.as_deref() != Some(sender.as_str()) {
            debug!(
                connection_id = %origin,
                identity = %sender,
                claimed = envelope.from.as_deref(),
                "Rejecting envelope with mismatched sender"
            );
            let err = RoutingError::IdentityMismatch {
                expected: sender.clone(),
                claimed: envelope.from.clone(),
            };
            self.diagnostics.record(
                RoutingRecord::failed(
                    sender,
                    &envelope.to,
                    &envelope.kind,
                    RoutingFailure::IdentityMismatch,
                ),
                Some(kind),
                started.elapsed(),
            );
            self.reply_error(origin, &err);
            return RouteOutcome::Rejected(err);
        }

        let recipients = match self.registry.resolve(&Identity::from(envelope.to.as_str())) {
            Ok(recipients) => recipients,
            Err(_) => {
                self.diagnostics.record(
                    RoutingRecord::failed(
                        sender,
                        &envelope.to,
                        &envelope.kind,
                        RoutingFailure::TargetOffline,
                    ),
                    Some(kind),
                    started.elapsed(),
                );
                if let Err(err) = self
                    .registry
                    .send_to(origin, ServerMessage::target_offline(envelope.to.clone()).into())
                {
                    debug!(connection_id = %origin, error = %err, "Failed to enqueue target-offline");
                }
                return RouteOutcome::Rejected(RoutingError::TargetOffline(envelope.to.clone()));
            }
        };

        let mut delivered = 0;
        let mut failed: SmallVec<[ConnectionId; 4]> = SmallVec::new();
        for recipient in &recipients {
            match recipient
                .sender
                .try_send(Outbound::Relay(envelope.raw().clone()))
            {
                Ok(()) => delivered += 1,
                Err(err) => {
                    self.metrics.increment_outbound_dropped();
                    warn!(
                        connection_id = %recipient.id,
                        recipient = %envelope.to,
                        kind = kind.as_str(),
                        full = matches!(err, TrySendError::Full(_)),
                        "Dropping signal for unwritable connection"
                    );
                    failed.push(recipient.id);
                }
            }
        }

        for id in &failed {
            self.registry.unregister(*id, DisconnectReason::TransportError);
        }

        self.diagnostics.record(
            RoutingRecord::delivered(sender, &envelope.to, &envelope.kind),
            Some(kind),
            started.elapsed(),
        );

        RouteOutcome::Delivered {
            recipients: delivered,
            evicted: failed.len(),
        }
    }

    fn reply_error(&self, origin: ConnectionId, err: &RoutingError) {
        let Some(code) = err.code() else {
            return;
        };
        if let Err(send_err) = self
            .registry
            .send_to(origin, ServerMessage::error(code, err.to_string()).into())
        {
            debug!(connection_id = %origin, error = %send_err, "Failed to enqueue routing error");
        }
    }
}
