//! WebSocket configuration types.

use super::defaults::{default_auth_timeout_secs, default_max_message_size};
use serde::{Deserialize, Serialize};

/// WebSocket configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebSocketConfig {
    /// Authentication timeout in seconds (time allowed for clients to authenticate)
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    /// Largest accepted inbound text frame in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: default_auth_timeout_secs(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl WebSocketConfig {
    /// Validate WebSocket configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(5..=60).contains(&self.auth_timeout_secs) {
            anyhow::bail!(
                "websocket.auth_timeout_secs must be between 5 and 60 seconds (configured: {})",
                self.auth_timeout_secs
            );
        }
        if self.max_message_size < 256 {
            anyhow::bail!(
                "websocket.max_message_size must be at least 256 bytes (configured: {})",
                self.max_message_size
            );
        }
        Ok(())
    }
}
