use thiserror::Error;

use crate::protocol::ErrorCode;

/// Reasons the authentication gate refuses a credential.
///
/// Every variant closes the connection with code 4001; the variant only
/// changes what the client is told in the `auth-error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no credential was presented")]
    MissingCredential,
    #[error("credential has expired")]
    Expired,
    #[error("credential is malformed: {0}")]
    Malformed(String),
    #[error("credential is not trusted: {0}")]
    Untrusted(String),
}

impl AuthError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MissingCredential => ErrorCode::MissingCredential,
            Self::Expired => ErrorCode::Expired,
            Self::Malformed(_) => ErrorCode::Malformed,
            Self::Untrusted(_) => ErrorCode::Untrusted,
        }
    }

    /// Label used for log fields and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::Expired => "expired",
            Self::Malformed(_) => "malformed",
            Self::Untrusted(_) => "untrusted",
        }
    }
}

/// Failure reported by a [`TokenVerifier`](super::TokenVerifier).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("token expired")]
    Expired,
    #[error("token could not be decoded: {0}")]
    Malformed(String),
    #[error("token rejected: {0}")]
    Untrusted(String),
}

impl From<VerifyError> for AuthError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Expired => Self::Expired,
            VerifyError::Malformed(detail) => Self::Malformed(detail),
            VerifyError::Untrusted(detail) => Self::Untrusted(detail),
        }
    }
}
