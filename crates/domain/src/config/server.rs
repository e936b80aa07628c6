use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port of the public persona (external API-key callers).
    /// Overridable via the `PORT` env var.
    #[serde(default = "d_public_port")]
    pub public_port: u16,
    /// Port of the internal persona (bearer-token inter-agent calls).
    #[serde(default = "d_internal_port")]
    pub internal_port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Sliding-window per-IP rate limit for the public persona.
    /// `None` disables rate limiting.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_port: d_public_port(),
            internal_port: d_internal_port(),
            host: d_host(),
            cors: CorsConfig::default(),
            rate_limit: None,
        }
    }
}

impl ServerConfig {
    /// Apply `PORT` from the environment over the configured public port.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.public_port = port;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window per client IP.
    #[serde(default = "d_max_requests")]
    pub max_requests: usize,
    /// Window length in milliseconds.
    #[serde(default = "d_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: d_max_requests(),
            window_ms: d_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_public_port() -> u16 {
    4000
}
fn d_internal_port() -> u16 {
    4001
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_max_requests() -> usize {
    60
}
fn d_window_ms() -> u64 {
    60_000
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:*".into(),
        "http://127.0.0.1:*".into(),
    ]
}
