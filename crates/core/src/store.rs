//! Agent Configuration Lookup
//!
//! The bridge never owns agent data. It reaches it through [`AgentStore`],
//! which the service backs with the web application's database.

use crate::agent_config::AgentConfiguration;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Read access to agents and their configuration.
///
/// Implementations may hit the network; callers treat every error as
/// session-local.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Whether an agent with this identifier exists.
    async fn agent_exists(&self, agent_id: &str) -> Result<bool>;

    /// Fetches the agent's configuration, `None` if the agent has none.
    async fn agent_configuration(&self, agent_id: &str) -> Result<Option<AgentConfiguration>>;
}

/// An `AgentStore` kept in memory, for local development and tests.
#[derive(Default)]
pub struct InMemoryAgentStore {
    agents: RwLock<HashMap<String, AgentConfiguration>>,
}

impl InMemoryAgentStore {
    /// Creates a store pre-populated with the given configurations.
    pub fn with_agents(configs: impl IntoIterator<Item = AgentConfiguration>) -> Self {
        let agents = configs
            .into_iter()
            .map(|c| (c.agent_id.clone(), c))
            .collect();
        Self {
            agents: RwLock::new(agents),
        }
    }

    pub async fn insert(&self, config: AgentConfiguration) {
        self.agents
            .write()
            .await
            .insert(config.agent_id.clone(), config);
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn agent_exists(&self, agent_id: &str) -> Result<bool> {
        Ok(self.agents.read().await.contains_key(agent_id))
    }

    async fn agent_configuration(&self, agent_id: &str) -> Result<Option<AgentConfiguration>> {
        Ok(self.agents.read().await.get(agent_id).cloned())
    }
}
