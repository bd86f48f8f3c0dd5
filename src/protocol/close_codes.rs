use serde::{Deserialize, Serialize};
use std::fmt;

/// WebSocket close code sent when the server is going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// WebSocket close code for an unexpected server-side condition.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Credential rejected by the authentication gate.
pub const CLOSE_AUTH_FAILED: u16 = 4001;
/// No credential arrived within the authentication window.
pub const CLOSE_AUTH_TIMEOUT: u16 = 4002;
/// Connection missed a heartbeat probe.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4008;
/// Per-address connection limit reached.
pub const CLOSE_TOO_MANY_CONNECTIONS: u16 = 4029;

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Peer closed the socket or the stream ended.
    ClientClosed,
    /// Read or write on the transport failed, or the outbound queue was unusable.
    TransportError,
    /// Server is draining connections during shutdown.
    ServerShutdown,
    /// Credential verification failed.
    AuthFailed,
    /// Authentication window elapsed.
    AuthTimeout,
    /// Two consecutive heartbeat ticks without inbound traffic.
    HeartbeatTimeout,
    /// Refused at registration because of the per-address cap.
    ConnectionLimit,
}

impl DisconnectReason {
    /// Close code to send to the peer, if the server initiates the close.
    ///
    /// `ClientClosed` has no code because the peer already started the
    /// closing handshake. `TransportError` uses 1011 on a best-effort basis.
    pub const fn close_code(self) -> Option<u16> {
        match self {
            Self::ClientClosed => None,
            Self::TransportError => Some(CLOSE_INTERNAL_ERROR),
            Self::ServerShutdown => Some(CLOSE_GOING_AWAY),
            Self::AuthFailed => Some(CLOSE_AUTH_FAILED),
            Self::AuthTimeout => Some(CLOSE_AUTH_TIMEOUT),
            Self::HeartbeatTimeout => Some(CLOSE_HEARTBEAT_TIMEOUT),
            Self::ConnectionLimit => Some(CLOSE_TOO_MANY_CONNECTIONS),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::ServerShutdown => "server_shutdown",
            Self::AuthFailed => "auth_failed",
            Self::AuthTimeout => "auth_timeout",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ConnectionLimit => "connection_limit",
        }
    }

    /// Short text placed in the close frame's reason field.
    pub const fn close_text(self) -> &'static str {
        match self {
            Self::ClientClosed => "",
            Self::TransportError => "transport error",
            Self::ServerShutdown => "server shutting down",
            Self::AuthFailed => "authentication failed",
            Self::AuthTimeout => "authentication timeout",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::ConnectionLimit => "too many connections",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
