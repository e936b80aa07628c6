use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Foreman endpoint. Empty = use the in-process queue.
    /// Overridable via the `FOREMAN_ENDPOINT` env var.
    #[serde(default)]
    pub endpoint: String,
    /// Environment variable holding the Foreman API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    /// Connection attempts before `enqueue` fails with `QueueUnavailable`.
    #[serde(default = "d_connect_retry")]
    pub connect_retry: u32,
    /// Delivery attempts for agent-execution tasks.
    #[serde(default = "d_agent_max_attempts")]
    pub agent_max_attempts: u32,
    /// Delivery attempts for polling tasks.
    #[serde(default = "d_poll_max_attempts")]
    pub poll_max_attempts: u32,
    /// Consumers started per registered handler.
    #[serde(default = "d_worker_concurrency")]
    pub worker_concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key_env: d_api_key_env(),
            connect_retry: d_connect_retry(),
            agent_max_attempts: d_agent_max_attempts(),
            poll_max_attempts: d_poll_max_attempts(),
            worker_concurrency: d_worker_concurrency(),
        }
    }
}

impl QueueConfig {
    /// Apply `FOREMAN_ENDPOINT` from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("FOREMAN_ENDPOINT") {
            if !endpoint.is_empty() {
                self.endpoint = endpoint;
            }
        }
        self
    }
}

fn d_api_key_env() -> String {
    "FOREMAN_API_KEY".into()
}
fn d_connect_retry() -> u32 {
    5
}
fn d_agent_max_attempts() -> u32 {
    3
}
fn d_poll_max_attempts() -> u32 {
    10
}
fn d_worker_concurrency() -> usize {
    4
}
