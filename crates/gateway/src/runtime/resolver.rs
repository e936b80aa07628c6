//! Agent resolution.
//!
//! Git-backed definitions live behind this trait; the gateway ships a
//! config-backed resolver. Lookup is literal — namespace prefixes such as
//! `myrepo/feature/agent` are ordinary name characters.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use shaman_domain::config::{AgentDefinition, Config};
use shaman_domain::{Error, Result};

#[async_trait::async_trait]
pub trait AgentResolver: Send + Sync {
    /// Resolve an agent definition visible to `org_id`.
    async fn resolve(&self, org_id: Uuid, agent_name: &str) -> Result<AgentDefinition>;

    /// Agent definitions visible to `org_id`. `exposed_only` restricts to
    /// the public-discovery allow-list.
    async fn list(&self, org_id: Uuid, exposed_only: bool) -> Vec<AgentDefinition>;
}

/// Resolver over the `[agents]` table of the config file. Definitions are
/// shared across organizations; tenant-owned repositories plug in behind
/// the same trait.
pub struct ConfigAgentResolver {
    agents: HashMap<String, AgentDefinition>,
}

impl ConfigAgentResolver {
    pub fn from_config(config: &Config) -> Self {
        let mut agents = HashMap::new();
        for (name, definition) in &config.agents {
            let mut definition = definition.clone();
            definition.name = name.clone();
            agents.insert(name.clone(), definition);
        }
        tracing::info!(agent_count = agents.len(), "agent resolver ready");
        Self { agents }
    }

    pub fn shared(config: &Config) -> Arc<dyn AgentResolver> {
        Arc::new(Self::from_config(config))
    }
}

#[async_trait::async_trait]
impl AgentResolver for ConfigAgentResolver {
    async fn resolve(&self, _org_id: Uuid, agent_name: &str) -> Result<AgentDefinition> {
        self.agents
            .get(agent_name)
            .cloned()
            .ok_or_else(|| Error::AgentNotFound(agent_name.to_owned()))
    }

    async fn list(&self, _org_id: Uuid, exposed_only: bool) -> Vec<AgentDefinition> {
        let mut agents: Vec<AgentDefinition> = self
            .agents
            .values()
            .filter(|a| !exposed_only || a.exposed)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }
}
