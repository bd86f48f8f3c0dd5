use crate::protocol::{ConnectionId, DisconnectReason, ErrorCode, Outbound, ServerMessage};
use crate::server::{RegisterError, Registration, RelayServer};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::sending::{send_close, send_immediate_server_message, send_outbound, WriteFlow};

/// How long a finished connection waits for queued frames to be written.
const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the writer task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendEnd {
    /// A close frame was written.
    Closed,
    /// The registry dropped the connection's queue.
    Drained,
    /// Writing to the socket failed.
    Failed,
}

pub(super) async fn handle_socket(
    socket: WebSocket,
    server: Arc<RelayServer>,
    addr: SocketAddr,
    handshake_token: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();
    let queue_capacity = server.config().outbound_queue_capacity.max(1);
    let (tx, mut rx) = mpsc::channel::<Outbound>(queue_capacity);

    let Registration {
        id: connection_id,
        shutdown,
    } = match server.register_connection(tx, addr) {
        Ok(registration) => {
            tracing::info!(connection_id = %registration.id, client_addr = %addr, "WebSocket connection established");
            registration
        }
        Err(RegisterError::IpLimitExceeded { current, limit }) => {
            let error_message = ServerMessage::error(
                ErrorCode::TooManyConnections,
                format!("Too many connections from your IP ({current}/{limit})"),
            );
            if let Err(err) = send_immediate_server_message(&mut sender, &error_message).await {
                tracing::debug!(
                    client_addr = %addr,
                    error = %err,
                    "Failed to send IP limit error frame"
                );
            }
            if let Err(err) = send_close(&mut sender, DisconnectReason::ConnectionLimit).await {
                tracing::debug!(
                    client_addr = %addr,
                    error = %err,
                    "Failed to send IP limit close frame"
                );
            }
            return;
        }
        Err(RegisterError::ShuttingDown) => {
            tracing::debug!(client_addr = %addr, "Refusing connection during shutdown");
            if let Err(err) = send_close(&mut sender, DisconnectReason::ServerShutdown).await {
                tracing::debug!(
                    client_addr = %addr,
                    error = %err,
                    "Failed to send shutdown close frame"
                );
            }
            return;
        }
    };

    // Spawn task to handle outgoing messages
    let mut send_task = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match send_outbound(&mut sender, item, &connection_id).await {
                Ok(WriteFlow::Continue) => {}
                Ok(WriteFlow::Closed) => return SendEnd::Closed,
                Err(_) => return SendEnd::Failed,
            }
        }
        let _ = sender.close().await;
        SendEnd::Drained
    });

    // A credential on the upgrade request is checked before any frame is read.
    if let Some(token) = handshake_token.as_deref() {
        server
            .authenticate(connection_id, Some(token), None)
            .await;
    }

    // Handle incoming messages
    let server_clone = server.clone();
    let mut receive_task = tokio::spawn(async move {
        read_loop(&server_clone, connection_id, &mut receiver, &shutdown).await
    });

    let reason = tokio::select! {
        joined = &mut receive_task => match joined {
            Ok(reason) => reason,
            Err(err) => {
                tracing::warn!(%connection_id, error = %err, "Receive task ended abnormally");
                Some(DisconnectReason::TransportError)
            }
        },
        ended = &mut send_task => {
            receive_task.abort();
            let reason = match ended {
                Ok(SendEnd::Failed) | Err(_) => Some(DisconnectReason::TransportError),
                Ok(SendEnd::Closed | SendEnd::Drained) => None,
            };
            if let Some(reason) = reason {
                server.disconnect(connection_id, reason);
            }
            tracing::info!(%connection_id, "WebSocket connection closed");
            return;
        }
    };

    if let Some(reason) = reason {
        server.disconnect(connection_id, reason);
    }

    // Let the writer flush the close frame, if one was queued.
    match tokio::time::timeout(SEND_DRAIN_TIMEOUT, &mut send_task).await {
        Ok(Ok(SendEnd::Failed)) => {
            tracing::debug!(%connection_id, "Writer failed while draining");
        }
        Ok(_) => {}
        Err(_) => {
            tracing::debug!(%connection_id, "Writer did not drain in time");
            send_task.abort();
        }
    }

    tracing::info!(%connection_id, "WebSocket connection closed");
}

/// Reads frames until the peer leaves, the connection is unregistered
/// elsewhere, or authentication times out.
///
/// Returns the reason to unregister with, or `None` if the connection was
/// already removed from the registry.
async fn read_loop(
    server: &RelayServer,
    connection_id: ConnectionId,
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    shutdown: &tokio_util::sync::CancellationToken,
) -> Option<DisconnectReason> {
    let auth_deadline = tokio::time::sleep(server.config().auth_timeout);
    tokio::pin!(auth_deadline);
    let mut auth_pending = !server.registry().is_authenticated(connection_id);

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => return None,
            () = &mut auth_deadline, if auth_pending => {
                if server.expire_unauthenticated(connection_id) {
                    return None;
                }
                auth_pending = false;
                continue;
            }
            msg = receiver.next() => msg,
        };

        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                tracing::warn!(%connection_id, error = %e, "WebSocket error");
                return Some(DisconnectReason::TransportError);
            }
            None => return Some(DisconnectReason::ClientClosed),
        };

        match msg {
            Message::Text(text) => {
                server.handle_text_frame(connection_id, text.as_str()).await;
                if auth_pending && server.registry().is_authenticated(connection_id) {
                    auth_pending = false;
                }
            }
            Message::Binary(_) => {
                server.record_activity(connection_id);
                server.reject_frame(connection_id, &"binary frames are not supported");
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Protocol-level heartbeats count as liveness traffic
                server.record_activity(connection_id);
            }
            Message::Close(frame) => {
                tracing::debug!(
                    %connection_id,
                    code = frame.as_ref().map(|f| f.code),
                    "Client closed connection"
                );
                return Some(DisconnectReason::ClientClosed);
            }
        }
    }
}
