//! Identity existence checks run after a token verifies.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::protocol::Identity;

/// Answers whether a verified identity is allowed to connect.
///
/// Async so that implementations backed by an account service can perform
/// I/O. A lookup error is treated as "not trusted" by the gate.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn exists(&self, identity: &Identity) -> anyhow::Result<bool>;
}

/// Accepts every identity the verifier vouches for.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenDirectory;

#[async_trait]
impl IdentityDirectory for OpenDirectory {
    async fn exists(&self, _identity: &Identity) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Fixed allow-list, typically from `security.known_identities`.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    identities: HashSet<Identity>,
}

impl StaticDirectory {
    pub fn new<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Identity>,
    {
        Self {
            identities: identities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn exists(&self, identity: &Identity) -> anyhow::Result<bool> {
        Ok(self.identities.contains(identity))
    }
}
