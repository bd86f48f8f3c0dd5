// WebSocket module - organized into focused submodules
//
// - handler: WebSocket upgrade handler (entry point)
// - connection: Per-connection reader and writer tasks
// - sending: Outbound frame serialization and close frames
// - routes: HTTP route setup (health, stats, presence, metrics)
// - stats: Stats, presence and metrics endpoints with bearer auth
// - prometheus: Prometheus metrics rendering

mod connection;
mod handler;
mod prometheus;
mod routes;
mod sending;
mod stats;

pub use handler::{websocket_handler, UpgradeQuery};
pub use routes::create_router;
pub use stats::{
    presence_handler, prometheus_metrics_handler, reset_stats_handler, stats_handler, StatsQuery,
};
