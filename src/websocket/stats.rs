use crate::protocol::Identity;
use crate::server::{PresenceStatus, RelayServer, RelaySnapshot, DEFAULT_RECENT_RECORDS};
use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::prometheus::render_prometheus_metrics;

/// Constant-time secret comparison to prevent timing attacks.
fn secrets_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn enforce_metrics_auth(headers: &HeaderMap, server: &RelayServer) -> Result<(), StatusCode> {
    let config = server.config();
    if !config.require_metrics_auth {
        return Ok(());
    }

    let Some(raw_header) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    else {
        tracing::warn!("Unauthorized metrics access attempt: missing Authorization header");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let Some(token) = raw_header.strip_prefix("Bearer ") else {
        tracing::warn!("Unauthorized metrics access attempt: invalid Authorization scheme");
        return Err(StatusCode::UNAUTHORIZED);
    };

    if let Some(expected) = config.metrics_auth_token.as_deref() {
        if secrets_match(token, expected) {
            tracing::debug!("Metrics access authorized via bearer token");
            return Ok(());
        }
    }

    tracing::warn!("Unauthorized metrics access attempt: token rejected");
    Err(StatusCode::UNAUTHORIZED)
}

/// Query parameters for the stats endpoint
#[derive(Debug, Default, serde::Deserialize)]
pub struct StatsQuery {
    /// Number of recent routing records to include
    #[serde(default)]
    limit: Option<usize>,
}

/// Routing statistics, online identities and relay counters.
pub async fn stats_handler(
    headers: HeaderMap,
    State(server): State<Arc<RelayServer>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<RelaySnapshot>, StatusCode> {
    enforce_metrics_auth(&headers, server.as_ref())?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_RECORDS)
        .min(server.config().routing_history_capacity);
    Ok(Json(server.stats_snapshot(limit)))
}

/// Operator reset of routing counters and history.
pub async fn reset_stats_handler(
    headers: HeaderMap,
    State(server): State<Arc<RelayServer>>,
) -> Result<StatusCode, StatusCode> {
    enforce_metrics_auth(&headers, server.as_ref())?;
    server.reset_stats();
    Ok(StatusCode::NO_CONTENT)
}

/// Online state, open connections and last-seen time for one identity.
pub async fn presence_handler(
    State(server): State<Arc<RelayServer>>,
    Path(identity): Path<String>,
) -> Json<PresenceStatus> {
    Json(server.presence(&Identity::new(identity)))
}

/// Prometheus metrics endpoint (text format, version 0.0.4)
pub async fn prometheus_metrics_handler(
    headers: HeaderMap,
    State(server): State<Arc<RelayServer>>,
) -> axum::response::Result<axum::response::Response> {
    use axum::http::header::{HeaderValue, CONTENT_TYPE};
    use axum::response::IntoResponse;

    enforce_metrics_auth(&headers, server.as_ref())?;

    let body = render_prometheus_metrics(
        &server.metrics().snapshot(),
        &server.diagnostics().snapshot(),
        server.registry().authenticated_count(),
    );
    let headers = [(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    )];

    Ok((headers, body).into_response())
}
