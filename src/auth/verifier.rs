//! Cryptographic credential verification.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::error::VerifyError;
use crate::config::TokenVerifierConfig;

/// Claims extracted from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Subject the token was issued for; `None` when the token names nobody.
    pub subject: Option<String>,
}

/// Verifies a bearer credential and yields its subject.
///
/// Implementations only check the cryptographic envelope and standard claims.
/// Presence and subject checks belong to [`AuthGate`](super::AuthGate).
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<VerifiedToken, VerifyError>;
}

/// Token claims understood by [`JwtVerifier`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Legacy subject claim used by some issuers instead of `sub`
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Claims for `subject` that expire `ttl_secs` from now.
    pub fn for_subject(subject: impl Into<String>, ttl_secs: i64) -> Self {
        Self {
            sub: Some(subject.into()),
            exp: chrono::Utc::now().timestamp() + ttl_secs,
            ..Self::default()
        }
    }
}

/// HS256 shared-secret verifier.
pub struct JwtVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        Self {
            decoding: DecodingKey::from_secret(secret),
            encoding: EncodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn from_config(config: &TokenVerifierConfig) -> anyhow::Result<Self> {
        let secret = config
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("security.token.secret must be configured"))?;

        let mut verifier = Self::new(secret.as_bytes()).with_leeway(config.leeway_secs);
        if let Some(issuer) = &config.issuer {
            verifier = verifier.with_issuer(issuer);
        }
        if let Some(audience) = &config.audience {
            verifier = verifier.with_audience(audience);
        }
        Ok(verifier)
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }

    #[must_use]
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.validation.leeway = leeway_secs;
        self
    }

    /// Signs `claims` with the verifier's secret. Intended for tooling and tests.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, VerifyError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|err| VerifyError::Malformed(err.to_string()))
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, credential: &str) -> Result<VerifiedToken, VerifyError> {
        let data = decode::<TokenClaims>(credential, &self.decoding, &self.validation)
            .map_err(classify)?;
        let claims = data.claims;
        Ok(VerifiedToken {
            subject: claims.sub.or(claims.user_id),
        })
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> VerifyError {
    match err.kind() {
        ErrorKind::ExpiredSignature => VerifyError::Expired,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::MissingRequiredClaim(_) => VerifyError::Malformed(err.to_string()),
        _ => VerifyError::Untrusted(err.to_string()),
    }
}
