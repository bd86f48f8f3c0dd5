//! Default value functions for configuration fields.
//!
//! Used by serde's `#[serde(default = ...)]` attributes across the
//! configuration types.

use super::logging::LogFormat;

// =============================================================================
// Port & Root Config
// =============================================================================

pub const fn default_port() -> u16 {
    3540
}

// =============================================================================
// Relay Defaults
// =============================================================================

pub const fn default_heartbeat_interval_secs() -> u64 {
    30
}

pub const fn default_routing_history_capacity() -> usize {
    1000
}

/// Per-connection outbound queue depth before frames are considered undeliverable.
pub const fn default_outbound_queue_capacity() -> usize {
    256
}

pub const fn default_event_buffer_size() -> usize {
    256
}

/// Number of identities whose last-seen time is remembered.
pub const fn default_presence_capacity() -> usize {
    10_000
}

// =============================================================================
// WebSocket Defaults
// =============================================================================

pub const fn default_auth_timeout_secs() -> u64 {
    10
}

pub const fn default_max_message_size() -> usize {
    65536 // 64KB
}

// =============================================================================
// Security Defaults
// =============================================================================

pub fn default_cors_origins() -> String {
    "*".to_string()
}

pub const fn default_require_metrics_auth() -> bool {
    true
}

pub const fn default_max_connections_per_ip() -> usize {
    10
}

pub const fn default_token_leeway_secs() -> u64 {
    30
}

// =============================================================================
// Logging Defaults
// =============================================================================

pub fn default_log_dir() -> String {
    "logs".to_string()
}

pub fn default_log_filename() -> String {
    "relay.log".to_string()
}

pub fn default_rotation() -> String {
    "daily".to_string()
}

pub const fn default_enable_file_logging() -> bool {
    false
}

pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}
