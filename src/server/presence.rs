use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::{ConnectionInfo, ConnectionRegistry, RegistryEvent};
use crate::protocol::Identity;

/// Presence answer for a single identity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStatus {
    pub identity: Identity,
    pub online: bool,
    pub connections: Vec<ConnectionInfo>,
    /// When the identity's last connection closed, if it has been seen offline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Remembers when identities were last connected.
///
/// Fed by registry events rather than called from the registry, so the
/// registry does not know it exists. Bounded by LRU eviction.
pub struct PresenceTracker {
    last_seen: Mutex<LruCache<Identity, DateTime<Utc>>>,
}

impl PresenceTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            last_seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Applies one registry event.
    pub fn observe(&self, event: &RegistryEvent) {
        if let RegistryEvent::Disconnected {
            identity: Some(identity),
            ..
        } = event
        {
            self.last_seen.lock().put(identity.clone(), Utc::now());
        }
    }

    pub fn last_seen(&self, identity: &Identity) -> Option<DateTime<Utc>> {
        self.last_seen.lock().peek(identity).copied()
    }

    pub fn tracked(&self) -> usize {
        self.last_seen.lock().len()
    }

    pub fn status(&self, registry: &ConnectionRegistry, identity: &Identity) -> PresenceStatus {
        let connections = registry.connections_for(identity);
        let online = !connections.is_empty();
        PresenceStatus {
            identity: identity.clone(),
            online,
            connections,
            last_seen: if online {
                None
            } else {
                self.last_seen(identity)
            },
        }
    }

    /// Consumes registry events until `shutdown` fires or the registry is dropped.
    pub fn spawn(
        self: Arc<Self>,
        mut events: broadcast::Receiver<RegistryEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => self.observe(&event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Presence tracker lagged behind registry events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("Registry event channel closed");
                            break;
                        }
                    },
                }
            }
            info!(tracked = self.tracked(), "Presence tracker stopped");
        })
    }
}
