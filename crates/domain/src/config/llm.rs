use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider adapters (key = provider id, e.g. "openai").
    #[serde(default)]
    pub providers: HashMap<String, LlmProviderConfig>,
    /// Per-model pricing for cost accounting (key = model name).
    /// Rates are dollars per 1000 tokens.
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
    /// Fallback rate applied to models missing from `pricing`.
    /// Unknown models fall back here and log a warning.
    #[serde(default)]
    pub default_pricing: ModelPricing,
    /// In-loop retry attempts for retryable LLM errors.
    #[serde(default = "d_retry_attempts")]
    pub retry_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            pricing: HashMap::new(),
            default_pricing: ModelPricing::default(),
            retry_attempts: d_retry_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    /// Adapter kind. Currently `openai_compat`.
    #[serde(default = "d_kind")]
    pub kind: String,
    pub base_url: String,
    /// Environment variable holding this provider's API key.
    pub api_key_env: String,
    /// Models served by this provider; used by the registry for routing.
    #[serde(default)]
    pub models: Vec<String>,
}

/// Pricing per 1000 tokens for a specific model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Dollars per 1000 prompt tokens.
    pub prompt_per_1k: f64,
    /// Dollars per 1000 completion tokens.
    pub completion_per_1k: f64,
}

impl ModelPricing {
    /// Estimated cost in USD for the given token counts.
    pub fn estimate_cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.prompt_per_1k
            + completion_tokens as f64 * self.completion_per_1k)
            / 1_000.0
    }
}

fn d_kind() -> String {
    "openai_compat".into()
}
fn d_retry_attempts() -> u32 {
    3
}
