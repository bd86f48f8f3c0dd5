use crate::server::RelayServer;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;

use super::connection::handle_socket;

/// Floor for the transport-level frame and message cap.
const TRANSPORT_MESSAGE_LIMIT: usize = 16 * 1024 * 1024;

/// Query parameters accepted on the upgrade request
#[derive(Debug, Default, serde::Deserialize)]
pub struct UpgradeQuery {
    #[serde(default)]
    token: Option<String>,
}

/// WebSocket handler for the signaling protocol
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(server): State<Arc<RelayServer>>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
) -> Response {
    let handshake_token = handshake_token(query.token, &headers);
    let transport_limit = transport_limit(server.config().max_message_size);

    // Oversized frames must reach the relay so it can answer with
    // MESSAGE_TOO_LARGE and keep the connection open.
    ws.max_message_size(transport_limit)
        .max_frame_size(transport_limit)
        .on_upgrade(move |socket| handle_socket(socket, server, addr, handshake_token))
}

fn transport_limit(relay_limit: usize) -> usize {
    relay_limit.max(TRANSPORT_MESSAGE_LIMIT)
}

/// Credential presented on the upgrade request: `?token=` wins over an
/// `Authorization: Bearer` header.
fn handshake_token(query_token: Option<String>, headers: &HeaderMap) -> Option<String> {
    query_token
        .filter(|token| !token.trim().is_empty())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_owned)
        })
}
