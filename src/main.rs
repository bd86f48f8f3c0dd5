#![cfg_attr(not(test), deny(clippy::panic))]

use clap::Parser;
use peerlink_relay::auth::AuthGate;
use peerlink_relay::config;
use peerlink_relay::logging;
use peerlink_relay::server::{RelayServer, ServerConfig};
use peerlink_relay::websocket;
use std::{net::SocketAddr, sync::Arc};

/// PeerLink -- in-memory WebSocket signaling relay for peer-to-peer calls
#[derive(Parser, Debug)]
#[command(name = "peerlink-relay")]
#[command(about = "An in-memory WebSocket signaling relay for establishing peer-to-peer calls")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines and pre-deployment checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    /// Useful for debugging configuration loading from multiple sources.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = Arc::new(config::load());

    if cli.print_config {
        let json = serde_json::to_string_pretty(&*cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    // config::load() only reports validation problems; here they are fatal.
    let validation_result = config::validate_config_security(&cfg);

    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.port);
                println!(
                    "  Heartbeat interval: {}s",
                    cfg.relay.heartbeat_interval_secs
                );
                println!("  Auth timeout: {}s", cfg.websocket.auth_timeout_secs);
                println!(
                    "  Metrics auth required: {}",
                    cfg.security.require_metrics_auth
                );
                println!(
                    "  Known identities: {}",
                    cfg.security
                        .known_identities
                        .as_ref()
                        .map_or_else(|| "any".to_string(), |known| known.len().to_string())
                );
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    validation_result?;

    let _log_guard = logging::init_with_config(&cfg.logging);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!(%addr, "Starting PeerLink relay");

    let gate = AuthGate::from_config(&cfg.security)?;
    let relay = RelayServer::new(ServerConfig::from_config(&cfg), gate);
    relay.start();

    let app = websocket::create_router(&cfg.security.cors_origins).with_state(relay.clone());
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        cors_origins = %cfg.security.cors_origins,
        "Server started over HTTP - WebSocket: /ws, Stats: /stats, Metrics: /metrics/prom"
    );

    let shutdown_relay = relay.clone();
    axum::serve(listener, make_service)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Close sockets first so upgraded connections do not hold the
            // graceful shutdown open.
            shutdown_relay.shutdown().await;
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod cli_tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn test_cli_default_no_flags() {
        let cli = Cli::try_parse_from(["peerlink-relay"]).unwrap();
        assert!(!cli.validate_config);
        assert!(!cli.print_config);
    }

    #[test]
    fn test_cli_validate_config_long() {
        let cli = Cli::try_parse_from(["peerlink-relay", "--validate-config"]).unwrap();
        assert!(cli.validate_config);
        assert!(!cli.print_config);
    }

    #[test]
    fn test_cli_validate_config_short() {
        let cli = Cli::try_parse_from(["peerlink-relay", "-c"]).unwrap();
        assert!(cli.validate_config);
    }

    #[test]
    fn test_cli_print_config() {
        let cli = Cli::try_parse_from(["peerlink-relay", "--print-config"]).unwrap();
        assert!(!cli.validate_config);
        assert!(cli.print_config);
    }

    #[test]
    fn test_cli_validate_and_print_config_conflict() {
        let result = Cli::try_parse_from(["peerlink-relay", "--validate-config", "--print-config"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("cannot be used with"));
    }

    #[test]
    fn test_cli_help_contains_flags() {
        let result = Cli::try_parse_from(["peerlink-relay", "--help"]);
        assert!(result.is_err()); // --help causes early exit which is an "error"
        let help_text = result.unwrap_err().to_string();
        assert!(help_text.contains("--validate-config"));
        assert!(help_text.contains("--print-config"));
    }
}
