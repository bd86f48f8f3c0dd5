use std::sync::Arc;

use tracing::{debug, warn};

use super::directory::{IdentityDirectory, OpenDirectory, StaticDirectory};
use super::error::AuthError;
use super::verifier::{JwtVerifier, TokenVerifier};
use crate::config::SecurityConfig;
use crate::protocol::Identity;

/// Turns a presented credential into a verified [`Identity`].
///
/// The gate owns the policy (a credential must be present, must name a
/// subject, must match any identity the client claimed, and the subject must
/// be known to the directory); cryptography is delegated to the
/// [`TokenVerifier`].
#[derive(Clone)]
pub struct AuthGate {
    verifier: Arc<dyn TokenVerifier>,
    directory: Arc<dyn IdentityDirectory>,
}

impl AuthGate {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            verifier,
            directory: Arc::new(OpenDirectory),
        }
    }

    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn IdentityDirectory>) -> Self {
        self.directory = directory;
        self
    }

    /// JWT verifier plus, when `known_identities` is set, a static allow-list.
    pub fn from_config(security: &SecurityConfig) -> anyhow::Result<Self> {
        let verifier = JwtVerifier::from_config(&security.token)?;
        let gate = Self::new(Arc::new(verifier));
        Ok(match &security.known_identities {
            Some(known) => gate.with_directory(Arc::new(StaticDirectory::new(known.clone()))),
            None => gate,
        })
    }

    /// Verifies a credential with no identity claim attached.
    pub async fn verify(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        self.verify_claim(credential, None).await
    }

    /// Verifies a credential and checks it against the identity the client
    /// says it is (the `userId` of an `auth` message).
    pub async fn verify_claim(
        &self,
        credential: Option<&str>,
        claimed: Option<&str>,
    ) -> Result<Identity, AuthError> {
        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingCredential)?;

        let verified = self.verifier.verify(credential)?;
        let subject = verified
            .subject
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AuthError::Malformed("token has no subject".into()))?;

        if let Some(claimed) = claimed.filter(|c| !c.is_empty()) {
            if claimed != subject {
                debug!(claimed, subject = %subject, "Claimed identity differs from token subject");
                return Err(AuthError::Untrusted(
                    "token was not issued for the claimed user".into(),
                ));
            }
        }

        let identity = Identity::new(subject);
        match self.directory.exists(&identity).await {
            Ok(true) => Ok(identity),
            Ok(false) => Err(AuthError::Untrusted(format!("unknown identity {identity}"))),
            Err(err) => {
                warn!(%identity, error = %err, "Identity directory lookup failed");
                Err(AuthError::Untrusted("identity lookup failed".into()))
            }
        }
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").finish_non_exhaustive()
    }
}
