// Protocol module: wire envelopes, error codes and close codes

pub mod close_codes;
pub mod error_codes;
pub mod messages;
pub mod types;

pub use close_codes::DisconnectReason;
pub use error_codes::ErrorCode;
pub use messages::{
    parse_inbound, ClientControl, FrameError, InboundFrame, Outbound, ServerMessage,
    SignalEnvelope, CONTROL_TYPES,
};
pub use types::{now_millis, ConnectionId, Identity, SignalKind, UnknownSignalKind};
