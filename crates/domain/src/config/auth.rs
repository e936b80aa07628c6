use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Authentication
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the symmetric JWT secret shared by the
    /// scheduler and workers. Read once at startup; rotation is a restart.
    #[serde(default = "d_jwt_secret_env")]
    pub jwt_secret_env: String,
    /// Issued API keys for the public persona. Keys are stored as
    /// hex-encoded SHA-256 digests, never in the clear.
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
    /// Base URL workers use for recursive internal A2A calls.
    /// Overridable via the `INTERNAL_A2A_URL` env var.
    #[serde(default = "d_internal_a2a_url")]
    pub internal_a2a_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret_env: d_jwt_secret_env(),
            api_keys: Vec::new(),
            internal_a2a_url: d_internal_a2a_url(),
        }
    }
}

impl AuthConfig {
    /// Apply `INTERNAL_A2A_URL` from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("INTERNAL_A2A_URL") {
            if !url.is_empty() {
                self.internal_a2a_url = url;
            }
        }
        self
    }
}

/// One issued API key, bound to an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub org_id: Uuid,
    /// Hex-encoded SHA-256 digest of the opaque key material.
    pub key_hash: String,
}

fn d_jwt_secret_env() -> String {
    "JWT_SECRET".into()
}

fn d_internal_a2a_url() -> String {
    "http://127.0.0.1:4001".into()
}
