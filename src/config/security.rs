//! Security and authentication configuration types.

use super::defaults::{
    default_cors_origins, default_max_connections_per_ip, default_require_metrics_auth,
    default_token_leeway_secs,
};
use serde::{Deserialize, Serialize};

/// Security configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    /// Allowed CORS origins (comma-separated, or "*" for any)
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
    /// Require a bearer token on the stats and metrics endpoints
    #[serde(default = "default_require_metrics_auth")]
    pub require_metrics_auth: bool,
    /// Bearer token for the stats and metrics endpoints
    #[serde(default)]
    pub metrics_auth_token: Option<String>,
    /// Maximum simultaneous connections per IP address
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,
    /// Credential verification settings
    #[serde(default)]
    pub token: TokenVerifierConfig,
    /// When set, only these identities may authenticate.
    #[serde(default)]
    pub known_identities: Option<Vec<String>>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cors_origins: default_cors_origins(),
            require_metrics_auth: default_require_metrics_auth(),
            metrics_auth_token: None,
            max_connections_per_ip: default_max_connections_per_ip(),
            token: TokenVerifierConfig::default(),
            known_identities: None,
        }
    }
}

/// Settings for the HS256 bearer token verifier.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TokenVerifierConfig {
    /// Shared HMAC secret used to sign client tokens
    #[serde(default)]
    pub secret: Option<String>,
    /// Expected `iss` claim, if any
    #[serde(default)]
    pub issuer: Option<String>,
    /// Expected `aud` claim, if any
    #[serde(default)]
    pub audience: Option<String>,
    /// Clock skew tolerance applied to `exp` and `nbf`
    #[serde(default = "default_token_leeway_secs")]
    pub leeway_secs: u64,
}

impl Default for TokenVerifierConfig {
    fn default() -> Self {
        Self {
            secret: None,
            issuer: None,
            audience: None,
            leeway_secs: default_token_leeway_secs(),
        }
    }
}
