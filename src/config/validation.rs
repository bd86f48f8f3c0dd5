//! Configuration validation functions.

use super::Config;

/// Shortest HMAC secret accepted without a warning.
const RECOMMENDED_SECRET_LEN: usize = 32;

/// Validate credential settings and operational bounds.
pub fn validate_config_security(config: &Config) -> anyhow::Result<()> {
    let secret = config
        .security
        .token
        .secret
        .as_deref()
        .filter(|s| !s.is_empty());

    let Some(secret) = secret else {
        anyhow::bail!(
            "\nCRITICAL: No token signing secret is configured!\n\
             ===================================================================\n\
             Clients authenticate with HS256 tokens signed by a shared secret:\n\
             export PEERLINK__SECURITY__TOKEN__SECRET=\"$(openssl rand -hex 32)\"\n\
             ===================================================================\n"
        );
    };

    if secret.len() < RECOMMENDED_SECRET_LEN {
        eprintln!(
            "\nWARNING: Token secret is short ({} chars). Use at least {RECOMMENDED_SECRET_LEN}.\n",
            secret.len()
        );
    }

    if config.security.require_metrics_auth {
        let token_present = config
            .security
            .metrics_auth_token
            .as_ref()
            .is_some_and(|t| !t.is_empty());

        if !token_present {
            anyhow::bail!(
                "\nCRITICAL: Metrics authentication is enabled but no credentials are configured!\n\
                 ===================================================================\n\
                 Configure a shared bearer token:\n\
                 export PEERLINK__SECURITY__METRICS_AUTH_TOKEN=\"$(openssl rand -hex 32)\"\n\
                 \n\
                 To disable metrics auth (NOT recommended), set:\n\
                 export PEERLINK__SECURITY__REQUIRE_METRICS_AUTH=false\n\
                 ===================================================================\n"
            );
        }
    } else if is_production_mode() {
        eprintln!(
            "\nSECURITY WARNING: /stats and /metrics/prom are publicly accessible in production.\n\
             export PEERLINK__SECURITY__REQUIRE_METRICS_AUTH=true\n"
        );
    }

    if config.security.max_connections_per_ip == 0 {
        anyhow::bail!("security.max_connections_per_ip must be greater than zero");
    }

    if let Some(known) = &config.security.known_identities {
        if known.iter().any(|identity| identity.trim().is_empty()) {
            anyhow::bail!("security.known_identities must not contain empty entries");
        }
    }

    config.websocket.validate()?;
    config.relay.validate()?;

    Ok(())
}

/// Detect if we're running in production mode.
///
/// Checks `PEERLINK__ENVIRONMENT`, then the generic `PRODUCTION` / `PROD` variables.
pub fn is_production_mode() -> bool {
    use std::env;

    if let Ok(mode) = env::var("PEERLINK__ENVIRONMENT") {
        let mode = mode.to_ascii_lowercase();
        return mode == "production" || mode == "prod";
    }

    env::var("PRODUCTION").is_ok() || env::var("PROD").is_ok()
}
