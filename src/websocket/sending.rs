use crate::protocol::{ConnectionId, DisconnectReason, Outbound, ServerMessage};
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;

type WsSink = SplitSink<WebSocket, Message>;

/// What the writer loop should do after handling one outbound item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WriteFlow {
    Continue,
    /// A close frame was written; the socket must not be used again.
    Closed,
}

pub(super) async fn send_immediate_server_message(
    sender: &mut WsSink,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    sender.send(Message::Text(encode(message).into())).await
}

/// Writes a close frame carrying the reason's close code, if it has one.
pub(super) async fn send_close(
    sender: &mut WsSink,
    reason: DisconnectReason,
) -> Result<(), axum::Error> {
    let frame = reason.close_code().map(|code| CloseFrame {
        code,
        reason: reason.close_text().into(),
    });
    sender.send(Message::Close(frame)).await
}

/// Writes one queued item to the socket.
pub(super) async fn send_outbound(
    sender: &mut WsSink,
    item: Outbound,
    connection_id: &ConnectionId,
) -> Result<WriteFlow, axum::Error> {
    let result = match item {
        Outbound::Control(message) => {
            sender
                .send(Message::Text(encode(&message).into()))
                .await
        }
        Outbound::Relay(frame) => sender.send(Message::Text(Utf8Bytes::from(&*frame))).await,
        Outbound::Close(reason) => {
            tracing::debug!(%connection_id, reason = reason.as_str(), "Sending close frame");
            return send_close(sender, reason).await.map(|()| WriteFlow::Closed);
        }
    };

    if let Err(err) = &result {
        tracing::warn!(%connection_id, error = %err, "Failed to send message, connection closed");
    }
    result.map(|()| WriteFlow::Continue)
}

fn encode(message: &ServerMessage) -> String {
    match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize server message");
            "{\"type\":\"error\",\"error\":\"Internal error\",\"code\":\"MALFORMED_FRAME\"}"
                .to_string()
        }
    }
}
