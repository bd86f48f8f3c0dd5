//! Configuration module for the relay.
//!
//! Supports JSON configuration files, stdin input, environment variable
//! overrides and compiled-in defaults.
//!
//! # Module Structure
//!
//! - [`crate::config::types`]: Root `Config` struct
//! - [`relay`]: Heartbeat cadence and buffer sizes
//! - [`websocket`]: WebSocket connection settings
//! - [`security`]: Token verification, CORS and metrics auth
//! - [`logging`]: Logging configuration
//! - [`crate::config::loader`]: Configuration loading functions
//! - [`crate::config::validation`]: Configuration validation functions
//! - [`crate::config::defaults`]: Default value functions

pub mod defaults;
pub mod loader;
pub mod logging;
pub mod relay;
pub mod security;
pub mod types;
pub mod validation;
pub mod websocket;

pub use loader::{load, load_from_str};

pub use logging::{LogFormat, LogLevel, LoggingConfig};

pub use relay::RelayConfig;

pub use security::{SecurityConfig, TokenVerifierConfig};

pub use types::Config;

pub use validation::{is_production_mode, validate_config_security};

pub use websocket::WebSocketConfig;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert_eq!(config.port, 3540);
        assert_eq!(config.relay.heartbeat_interval_secs, 30);
        assert_eq!(config.relay.routing_history_capacity, 1000);
        assert_eq!(config.relay.outbound_queue_capacity, 256);
        assert_eq!(config.websocket.auth_timeout_secs, 10);
        assert_eq!(config.websocket.max_message_size, 65536);
        assert_eq!(config.security.max_connections_per_ip, 10);
        assert_eq!(config.security.token.leeway_secs, 30);
        assert!(config.security.require_metrics_auth);
        assert!(config.security.known_identities.is_none());

        assert_eq!(config.logging.dir, "logs");
        assert_eq!(config.logging.filename, "relay.log");
        assert_eq!(config.logging.rotation, "daily");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(config.port, deserialized.port);
        assert_eq!(
            config.relay.heartbeat_interval_secs,
            deserialized.relay.heartbeat_interval_secs
        );
        assert_eq!(
            config.websocket.max_message_size,
            deserialized.websocket.max_message_size
        );
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 3540);
        assert_eq!(config.relay.presence_capacity, 10_000);
    }
}
