//! Shared application state passed to all API handlers.

use std::sync::Arc;

use shaman_domain::config::Config;
use shaman_domain::tool::ToolInvoker;
use shaman_providers::{PricingTable, ProviderRegistry};
use shaman_queue::{InMemoryQueue, TaskQueue};
use shaman_store::StoreGateway;

use crate::api::auth::ApiKeyIndex;
use crate::api::rate_limit::SlidingWindowLimiter;
use crate::rpc::MethodRegistry;
use crate::runtime::{
    CancelMap, ConfigAgentResolver, Executor, InternalA2aCaller, RunEventHub, Scheduler,
    ToolRouter, Worker,
};

/// Shared application state.
///
/// Fields are grouped by concern:
/// - **Core services** — config, stores, queue
/// - **Orchestration** — scheduler, method registry
/// - **Security** — hashed API keys, JWT secret, rate limiter
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: StoreGateway,
    pub queue: Arc<dyn TaskQueue>,

    // ── Orchestration ─────────────────────────────────────────────
    pub scheduler: Arc<Scheduler>,
    pub resolver: Arc<dyn crate::runtime::AgentResolver>,
    pub registry: Arc<MethodRegistry>,

    // ── Security (startup-computed) ───────────────────────────────
    /// SHA-256 digests of issued API keys (public persona).
    pub api_keys: Arc<ApiKeyIndex>,
    /// Symmetric JWT secret (internal persona). Read once at startup;
    /// rotation is a restart-only event.
    pub jwt_secret: Arc<String>,
    /// `None` disables rate limiting.
    pub rate_limiter: Option<Arc<SlidingWindowLimiter>>,
}

/// Assembles the service graph. Tests swap the provider registry and the
/// internal URL; production uses the config file.
pub struct AppBuilder {
    config: Arc<Config>,
    providers: Option<Arc<ProviderRegistry>>,
    invoker: Option<Arc<dyn ToolInvoker>>,
    internal_url: Option<String>,
    jwt_secret: Option<String>,
}

impl AppBuilder {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            providers: None,
            invoker: None,
            internal_url: None,
            jwt_secret: None,
        }
    }

    pub fn providers(mut self, providers: Arc<ProviderRegistry>) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn tool_invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Where workers reach the internal persona for recursive calls.
    pub fn internal_url(mut self, url: impl Into<String>) -> Self {
        self.internal_url = Some(url.into());
        self
    }

    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    /// Build the state and register the queue workers.
    pub fn build(self) -> AppState {
        let config = self.config;

        let jwt_secret = self.jwt_secret.unwrap_or_else(|| {
            match std::env::var(&config.auth.jwt_secret_env) {
                Ok(secret) if !secret.is_empty() => secret,
                _ => {
                    tracing::warn!(
                        env_var = %config.auth.jwt_secret_env,
                        "no JWT secret configured — generated an ephemeral one; \
                         external internal-persona callers will be rejected"
                    );
                    uuid::Uuid::new_v4().to_string()
                }
            }
        });

        let api_keys = Arc::new(ApiKeyIndex::from_hashes(
            config
                .auth
                .api_keys
                .iter()
                .filter_map(|entry| {
                    hex::decode(&entry.key_hash)
                        .ok()
                        .map(|digest| (entry.org_id, digest))
                })
                .collect(),
        ));

        let rate_limiter = config
            .server
            .rate_limit
            .as_ref()
            .map(|rl| Arc::new(SlidingWindowLimiter::new(rl)));

        let store = StoreGateway::in_memory();
        let queue = Arc::new(InMemoryQueue::new());
        let events = Arc::new(RunEventHub::new());
        let cancels = Arc::new(CancelMap::new());
        let resolver = ConfigAgentResolver::shared(&config);

        let providers = self
            .providers
            .unwrap_or_else(|| Arc::new(ProviderRegistry::from_config(&config.llm)));
        let pricing = Arc::new(PricingTable::from_config(&config.llm));

        let internal_url = self
            .internal_url
            .unwrap_or_else(|| config.auth.internal_a2a_url.clone());
        let caller = Arc::new(InternalA2aCaller::new(internal_url, jwt_secret.clone()));

        let router = Arc::new(ToolRouter::new(
            store.clone(),
            caller,
            self.invoker,
            config.limits,
        ));

        let executor = Arc::new(Executor::new(
            store.clone(),
            providers,
            pricing,
            router,
            resolver.clone(),
            cancels.clone(),
            config.llm.retry_attempts,
            config.limits.max_depth,
        ));

        let scheduler = Arc::new(Scheduler::new(
            config.clone(),
            store.clone(),
            queue.clone(),
            events,
            cancels.clone(),
            resolver.clone(),
        ));

        let worker = Arc::new(Worker::new(
            scheduler.clone(),
            executor,
            cancels,
            config.limits.step_timeout_ms,
        ));
        worker.register(
            queue.as_ref(),
            config.queue.worker_concurrency,
            config.queue.agent_max_attempts,
        );
        queue.set_dead_letter(worker.dead_letter_handler());

        let registry = Arc::new(MethodRegistry::new(scheduler.clone()));

        AppState {
            config,
            store,
            queue,
            scheduler,
            resolver,
            registry,
            api_keys,
            jwt_secret: Arc::new(jwt_secret),
            rate_limiter,
        }
    }
}
