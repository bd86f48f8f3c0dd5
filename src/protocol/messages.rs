use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::close_codes::DisconnectReason;
use super::error_codes::ErrorCode;
use super::types::{now_millis, ConnectionId, Identity};

/// Envelope `type` values handled by the relay itself rather than forwarded.
pub const CONTROL_TYPES: [&str; 4] = ["auth", "auth-refresh", "ping", "pong"];

/// Control messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientControl {
    /// Present a bearer credential, optionally naming the expected identity
    Auth {
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        user_id: Option<String>,
    },
    /// Re-verify the connection with a fresh credential
    AuthRefresh {
        #[serde(default)]
        token: Option<String>,
    },
    Ping,
    Pong,
}

/// A signaling envelope destined for another identity.
///
/// The raw frame text is retained so delivery forwards exactly what the
/// sender wrote, payload included.
#[derive(Debug, Clone)]
pub struct SignalEnvelope {
    pub kind: String,
    pub from: Option<String>,
    pub to: String,
    pub data: Value,
    /// Sender-supplied stamp in whatever JSON form the client chose.
    pub timestamp: Option<Value>,
    raw: Arc<str>,
}

#[derive(Deserialize)]
struct EnvelopeFields {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    from: Option<Value>,
    to: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: Option<Value>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
    to: &'a str,
    data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<&'a Value>,
}

impl SignalEnvelope {
    /// Builds an envelope and renders its wire form. Used by clients and tests.
    pub fn new(kind: &str, from: Option<&str>, to: &str, data: Value) -> Self {
        let timestamp = Some(Value::from(now_millis()));
        let raw = serde_json::to_string(&EnvelopeRef {
            kind,
            from,
            to,
            data: &data,
            timestamp: timestamp.as_ref(),
        })
        .unwrap_or_default();
        Self {
            kind: kind.to_owned(),
            from: from.map(str::to_owned),
            to: to.to_owned(),
            data,
            timestamp,
            raw: Arc::from(raw),
        }
    }

    /// Original frame text, forwarded verbatim to recipients.
    pub fn raw(&self) -> &Arc<str> {
        &self.raw
    }

    fn from_value(value: Value, raw: &str) -> Result<Self, serde_json::Error> {
        let fields: EnvelopeFields = serde_json::from_value(value)?;
        // A non-string `from` can never name the sender, so it is kept as
        // absent and the router answers IDENTITY_MISMATCH.
        let from = match fields.from {
            Some(Value::String(from)) => Some(from),
            _ => None,
        };
        Ok(Self {
            kind: fields.kind,
            from,
            to: fields.to,
            data: fields.data,
            timestamp: fields.timestamp,
            raw: Arc::from(raw),
        })
    }
}

/// A decoded inbound text frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Control(ClientControl),
    Signal(SignalEnvelope),
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("invalid `{kind}` message: {source}")]
    InvalidControl {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid signaling envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),
}

/// Decodes one inbound text frame.
pub fn parse_inbound(text: &str) -> Result<InboundFrame, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(FrameError::InvalidJson)?;
    let kind = match &value {
        Value::Object(map) => match map.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err(FrameError::MissingType),
        },
        _ => return Err(FrameError::NotAnObject),
    };

    if CONTROL_TYPES.contains(&kind.as_str()) {
        return serde_json::from_value(value)
            .map(InboundFrame::Control)
            .map_err(|source| FrameError::InvalidControl { kind, source });
    }

    SignalEnvelope::from_value(value, text)
        .map(InboundFrame::Signal)
        .map_err(FrameError::InvalidEnvelope)
}

/// Message types sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once when the transport opens
    Welcome {
        client_id: ConnectionId,
        timestamp: i64,
    },
    /// Credential accepted and identity bound
    AuthSuccess { user_id: Identity, timestamp: i64 },
    /// Credential rejected
    AuthError {
        error: String,
        code: ErrorCode,
        timestamp: i64,
    },
    /// Recipient of a signaling message has no open connection
    TargetOffline { user_id: String, timestamp: i64 },
    /// Heartbeat probe or reply
    Ping,
    Pong,
    /// Per-frame rejection; the connection stays open
    Error {
        error: String,
        code: ErrorCode,
        timestamp: i64,
    },
}

impl ServerMessage {
    pub fn welcome(client_id: ConnectionId) -> Self {
        Self::Welcome {
            client_id,
            timestamp: now_millis(),
        }
    }

    pub fn auth_success(user_id: Identity) -> Self {
        Self::AuthSuccess {
            user_id,
            timestamp: now_millis(),
        }
    }

    pub fn auth_error(code: ErrorCode, error: impl Into<String>) -> Self {
        Self::AuthError {
            error: error.into(),
            code,
            timestamp: now_millis(),
        }
    }

    pub fn target_offline(user_id: impl Into<String>) -> Self {
        Self::TargetOffline {
            user_id: user_id.into(),
            timestamp: now_millis(),
        }
    }

    pub fn error(code: ErrorCode, error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            code,
            timestamp: now_millis(),
        }
    }
}

/// Items queued on a connection's outbound channel.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A message generated by the relay
    Control(Arc<ServerMessage>),
    /// A signaling frame forwarded verbatim from another connection
    Relay(Arc<str>),
    /// Close the socket with the reason's close code
    Close(DisconnectReason),
}

impl From<ServerMessage> for Outbound {
    fn from(message: ServerMessage) -> Self {
        Self::Control(Arc::new(message))
    }
}
