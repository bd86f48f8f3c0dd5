//! Relay core configuration: heartbeat cadence and buffer sizes.

use super::defaults::{
    default_event_buffer_size, default_heartbeat_interval_secs, default_outbound_queue_capacity,
    default_presence_capacity, default_routing_history_capacity,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayConfig {
    /// Seconds between liveness ticks. A connection silent for two ticks is evicted.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Number of routing records kept for diagnostics
    #[serde(default = "default_routing_history_capacity")]
    pub routing_history_capacity: usize,
    /// Bounded outbound queue size per connection
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Capacity of the registry event broadcast channel
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
    /// Identities tracked by the last-seen presence cache
    #[serde(default = "default_presence_capacity")]
    pub presence_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            routing_history_capacity: default_routing_history_capacity(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            event_buffer_size: default_event_buffer_size(),
            presence_capacity: default_presence_capacity(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval_secs == 0 {
            anyhow::bail!("relay.heartbeat_interval_secs must be greater than zero");
        }
        if self.outbound_queue_capacity == 0 {
            anyhow::bail!("relay.outbound_queue_capacity must be greater than zero");
        }
        if self.event_buffer_size == 0 {
            anyhow::bail!("relay.event_buffer_size must be greater than zero");
        }
        if self.presence_capacity == 0 {
            anyhow::bail!("relay.presence_capacity must be greater than zero");
        }
        Ok(())
    }
}
