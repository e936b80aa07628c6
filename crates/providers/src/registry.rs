//! Provider registry — routes a model name to its adapter.

use std::collections::HashMap;
use std::sync::Arc;

use shaman_domain::config::LlmConfig;
use shaman_domain::error::{Error, Result};

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

pub struct ProviderRegistry {
    /// model name → adapter serving it.
    by_model: HashMap<String, Arc<dyn LlmProvider>>,
    /// Used when a model is not claimed by any provider.
    fallback: Option<Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    /// Build all configured adapters. A provider that fails to initialize
    /// is skipped with a warning so one bad entry does not take down the
    /// rest.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut by_model: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut fallback: Option<Arc<dyn LlmProvider>> = None;

        for (id, provider_cfg) in &config.providers {
            if provider_cfg.kind != "openai_compat" {
                tracing::warn!(provider = %id, kind = %provider_cfg.kind, "unknown provider kind, skipping");
                continue;
            }
            let provider = match OpenAiCompatProvider::from_config(id, provider_cfg) {
                Ok(p) => Arc::new(p) as Arc<dyn LlmProvider>,
                Err(e) => {
                    tracing::warn!(provider = %id, error = %e, "provider init failed, skipping");
                    continue;
                }
            };
            for model in &provider_cfg.models {
                by_model.insert(model.clone(), provider.clone());
            }
            fallback.get_or_insert_with(|| provider.clone());
            tracing::info!(
                provider = %id,
                models = provider_cfg.models.len(),
                "LLM provider registered"
            );
        }

        Self { by_model, fallback }
    }

    /// Registry with a single adapter serving every model (tests, mocks).
    pub fn single(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            by_model: HashMap::new(),
            fallback: Some(provider),
        }
    }

    /// The adapter serving `model`.
    pub fn for_model(&self, model: &str) -> Result<Arc<dyn LlmProvider>> {
        self.by_model
            .get(model)
            .cloned()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| Error::Config(format!("no provider serves model {model}")))
    }

    pub fn is_empty(&self) -> bool {
        self.by_model.is_empty() && self.fallback.is_none()
    }
}
