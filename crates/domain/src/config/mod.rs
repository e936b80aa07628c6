mod agents;
mod auth;
mod limits;
mod llm;
mod queue;
mod server;

pub use agents::*;
pub use auth::*;
pub use limits::*;
pub use llm::*;
pub use queue::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Agent definitions (key = agent name, verbatim, `/` allowed).
    #[serde(default)]
    pub agents: HashMap<String, AgentDefinition>,
}

impl Config {
    /// Apply environment overrides (`PORT`, `FOREMAN_ENDPOINT`,
    /// `INTERNAL_A2A_URL`) over the file-loaded values.
    pub fn with_env_overrides(mut self) -> Self {
        self.server = self.server.with_env_overrides();
        self.queue = self.queue.with_env_overrides();
        self.auth = self.auth.with_env_overrides();
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.public_port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.public_port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.internal_port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.internal_port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.public_port == self.server.internal_port {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.internal_port".into(),
                message: "public and internal personas must bind distinct ports".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if let Some(rl) = &self.server.rate_limit {
            if rl.max_requests == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.max_requests".into(),
                    message: "must be greater than 0".into(),
                });
            }
            if rl.window_ms == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.window_ms".into(),
                    message: "must be greater than 0".into(),
                });
            }
        }

        if self.queue.worker_concurrency == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "queue.worker_concurrency".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.limits.max_depth == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "limits.max_depth".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.auth.api_keys.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "auth.api_keys".into(),
                message: "no API keys configured — the public persona rejects every caller".into(),
            });
        }
        for (i, entry) in self.auth.api_keys.iter().enumerate() {
            let digest_len = 64; // hex-encoded SHA-256
            if entry.key_hash.len() != digest_len
                || !entry.key_hash.chars().all(|c| c.is_ascii_hexdigit())
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("auth.api_keys[{i}].key_hash"),
                    message: "must be a 64-char hex-encoded SHA-256 digest".into(),
                });
            }
        }

        for (name, agent) in &self.agents {
            if agent.system_prompt.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("agents.{name}.system_prompt"),
                    message: "empty system prompt".into(),
                });
            }
            if agent.model.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("agents.{name}.model"),
                    message: "model must not be empty".into(),
                });
            }
            if agent.max_iterations == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("agents.{name}.max_iterations"),
                    message: "must be greater than 0".into(),
                });
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let issues = Config::default().validate();
        assert!(issues
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn colliding_ports_rejected() {
        let mut config = Config::default();
        config.server.internal_port = config.server.public_port;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "server.internal_port" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn bad_api_key_hash_rejected() {
        let mut config = Config::default();
        config.auth.api_keys.push(ApiKeyEntry {
            org_id: uuid::Uuid::new_v4(),
            key_hash: "not-hex".into(),
        });
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field.contains("key_hash") && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn agent_without_model_rejected() {
        let mut config = Config::default();
        config.agents.insert(
            "Broken".into(),
            serde_json::from_value(serde_json::json!({
                "system_prompt": "p",
                "model": ""
            }))
            .unwrap(),
        );
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "agents.Broken.model"));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError {
            severity: ConfigSeverity::Warning,
            field: "auth.api_keys".into(),
            message: "none configured".into(),
        };
        assert_eq!(err.to_string(), "[WARN] auth.api_keys: none configured");
    }
}
