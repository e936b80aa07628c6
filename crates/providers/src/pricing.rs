//! Model pricing table with a configured default fallback.

use std::collections::HashMap;
use std::collections::HashSet;

use parking_lot::Mutex;

use shaman_domain::config::{LlmConfig, ModelPricing};
use shaman_domain::stream::Usage;

/// Maps model names to per-1k rates. Unknown models fall back to the
/// configured default rate and log a warning (once per model).
pub struct PricingTable {
    rates: HashMap<String, ModelPricing>,
    default_rate: ModelPricing,
    warned: Mutex<HashSet<String>>,
}

impl PricingTable {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            rates: config.pricing.clone(),
            default_rate: config.default_pricing,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Cost in USD of one completion on `model`.
    pub fn cost_of(&self, model: &str, usage: &Usage) -> f64 {
        let rate = match self.rates.get(model) {
            Some(rate) => rate,
            None => {
                if self.warned.lock().insert(model.to_owned()) {
                    tracing::warn!(
                        model,
                        "no pricing configured for model, using default rate"
                    );
                }
                &self.default_rate
            }
        };
        rate.estimate_cost(usage.prompt_tokens, usage.completion_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PricingTable {
        let mut config = LlmConfig::default();
        config.pricing.insert(
            "gpt-4o".into(),
            ModelPricing {
                prompt_per_1k: 0.0025,
                completion_per_1k: 0.01,
            },
        );
        config.default_pricing = ModelPricing {
            prompt_per_1k: 0.001,
            completion_per_1k: 0.002,
        };
        PricingTable::from_config(&config)
    }

    #[test]
    fn known_model_uses_its_rate() {
        let usage = Usage {
            prompt_tokens: 1000,
            completion_tokens: 1000,
        };
        let cost = table().cost_of("gpt-4o", &usage);
        assert!((cost - 0.0125).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        let usage = Usage {
            prompt_tokens: 2000,
            completion_tokens: 500,
        };
        let cost = table().cost_of("mystery-model", &usage);
        assert!((cost - (0.002 + 0.001)).abs() < 1e-9);
    }
}
