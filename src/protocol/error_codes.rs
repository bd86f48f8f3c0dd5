use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes carried by `auth-error` and `error` frames
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication
    MissingCredential,
    Expired,
    Malformed,
    Untrusted,
    IdentityConflict,
    AuthenticationTimeout,

    // Routing
    Unauthenticated,
    UnknownKind,
    IdentityMismatch,

    // Transport
    MessageTooLarge,
    MalformedFrame,
    TooManyConnections,
}

impl ErrorCode {
    /// Human-readable description suitable for surfacing to clients.
    pub fn description(&self) -> &'static str {
        match self {
            Self::MissingCredential => "No credential was presented. Send an auth message with a token.",
            Self::Expired => "The credential has expired. Obtain a fresh token and authenticate again.",
            Self::Malformed => "The credential could not be parsed or is missing its subject claim.",
            Self::Untrusted => "The credential was not issued by a trusted authority for this identity.",
            Self::IdentityConflict => {
                "This connection is already authenticated as a different identity."
            }
            Self::AuthenticationTimeout => "Authentication was not completed in time.",
            Self::Unauthenticated => "Authenticate before sending signaling messages.",
            Self::UnknownKind => "The message type is not a supported signaling kind.",
            Self::IdentityMismatch => {
                "The `from` field must match the identity this connection authenticated as."
            }
            Self::MessageTooLarge => "The frame exceeds the maximum accepted message size.",
            Self::MalformedFrame => "The frame is not a valid signaling envelope.",
            Self::TooManyConnections => "Too many connections from this address.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MissingCredential => "MISSING_CREDENTIAL",
            Self::Expired => "EXPIRED",
            Self::Malformed => "MALFORMED",
            Self::Untrusted => "UNTRUSTED",
            Self::IdentityConflict => "IDENTITY_CONFLICT",
            Self::AuthenticationTimeout => "AUTHENTICATION_TIMEOUT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::UnknownKind => "UNKNOWN_KIND",
            Self::IdentityMismatch => "IDENTITY_MISMATCH",
            Self::MessageTooLarge => "MESSAGE_TOO_LARGE",
            Self::MalformedFrame => "MALFORMED_FRAME",
            Self::TooManyConnections => "TOO_MANY_CONNECTIONS",
        };
        f.write_str(text)
    }
}
