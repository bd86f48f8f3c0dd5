#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines
)]

//! # PeerLink Relay
//!
//! An in-memory WebSocket signaling relay for establishing peer-to-peer calls.
//!
//! Clients authenticate with a bearer token, then exchange offers, answers and
//! ICE candidates addressed by identity. Nothing is persisted: when the process
//! stops, every connection and statistic is gone.

/// Credential verification and identity lookup
pub mod auth;

/// Relay configuration and environment variables
pub mod config;

/// Structured logging configuration
pub mod logging;

/// Metrics collection and reporting
pub mod metrics;

/// WebSocket message protocol definitions
pub mod protocol;

/// Connection registry, routing and liveness
pub mod server;

/// WebSocket connection handling and HTTP endpoints
pub mod websocket;
