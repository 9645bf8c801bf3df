//! Agent registry (C3): a directory of agents with capabilities, supporting
//! discovery by capability set.
//!
//! Generalizes the reference's `AgentRegistry` (`agents/orchestrator/agent_registry.rs`)
//! from a `HashMap<AgentType, Arc<dyn Agent>>` of trait objects keyed by a
//! closed enum to a directory of plain [`AgentRecord`]s keyed by an open
//! agent id — the orchestrator is never meant to know an agent's
//! implementation, only its capability set (spec §9).

use crate::error::{OrchestrationError, Result};
use crate::models::{AgentHealth, AgentRecord};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Directory of known agents. Mutable only via its own methods (spec §5:
/// "no direct mutation from component A on component B's state").
#[derive(Clone)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<String, AgentRecord>>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        AgentRegistry {
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers an agent. Re-registering the same id overwrites the prior
    /// record and logs a `Duplicate` audit event rather than failing (spec
    /// §4.1).
    pub async fn register(&self, record: AgentRecord) {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&record.id) {
            warn!(agent_id = %record.id, "overwriting existing agent registration");
        }
        info!(agent_id = %record.id, name = %record.name, "agent registered");
        agents.insert(record.id.clone(), record);
    }

    pub async fn deregister(&self, id: &str) -> Result<()> {
        let mut agents = self.agents.write().await;
        if agents.remove(id).is_none() {
            return Err(OrchestrationError::UnknownAgent(id.to_string()));
        }
        info!(agent_id = %id, "agent deregistered");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<AgentRecord> {
        let agents = self.agents.read().await;
        agents
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestrationError::UnknownAgent(id.to_string()))
    }

    /// Returns every agent whose capability set is a superset of `required`,
    /// sorted deterministically by capability-count descending then name
    /// ascending (spec §4.1). Unhealthy agents remain discoverable; callers
    /// that care about health filter the result themselves.
    pub async fn discover(&self, required: &HashSet<String>) -> Vec<AgentRecord> {
        let agents = self.agents.read().await;
        let mut matches: Vec<AgentRecord> = agents
            .values()
            .filter(|record| required.is_subset(&record.capabilities))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            b.capabilities
                .len()
                .cmp(&a.capabilities.len())
                .then_with(|| a.name.cmp(&b.name))
        });
        matches
    }

    /// Convenience wrapper over [`discover`](Self::discover) for the common
    /// single-capability lookup the orchestrator performs per task.
    pub async fn discover_one(&self, capability: &str) -> Option<AgentRecord> {
        let required: HashSet<String> = [capability.to_string()].into_iter().collect();
        self.discover(&required).await.into_iter().next()
    }

    pub async fn set_health(&self, id: &str, health: AgentHealth) -> Result<()> {
        let mut agents = self.agents.write().await;
        let record = agents
            .get_mut(id)
            .ok_or_else(|| OrchestrationError::UnknownAgent(id.to_string()))?;
        record.health = health;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn agent(id: &str, name: &str, caps: &[&str]) -> AgentRecord {
        AgentRecord {
            id: id.to_string(),
            name: name.to_string(),
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            health: AgentHealth::Healthy,
            last_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn register_then_discover_by_capability() {
        let registry = AgentRegistry::new();
        registry
            .register(agent("dev-1", "dev-1", &["development"]))
            .await;

        let found = registry.discover_one("development").await;
        assert_eq!(found.unwrap().id, "dev-1");
    }

    #[tokio::test]
    async fn discover_requires_full_capability_superset() {
        let registry = AgentRegistry::new();
        registry
            .register(agent("dev-1", "dev-1", &["development"]))
            .await;
        registry
            .register(agent("dev-2", "dev-2", &["development", "analysis"]))
            .await;

        let required: HashSet<String> = ["development".to_string(), "analysis".to_string()]
            .into_iter()
            .collect();
        let found = registry.discover(&required).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "dev-2");
    }

    #[tokio::test]
    async fn discover_sorts_by_capability_count_desc_then_name_asc() {
        let registry = AgentRegistry::new();
        registry
            .register(agent("b-agent", "b-agent", &["general"]))
            .await;
        registry
            .register(agent("a-agent", "a-agent", &["general"]))
            .await;
        registry
            .register(agent("c-agent", "c-agent", &["general", "analysis"]))
            .await;

        let required: HashSet<String> = ["general".to_string()].into_iter().collect();
        let found = registry.discover(&required).await;
        assert_eq!(
            found.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["c-agent", "a-agent", "b-agent"]
        );
    }

    #[tokio::test]
    async fn register_discover_deregister_discover_round_trip() {
        let registry = AgentRegistry::new();
        registry
            .register(agent("dev-1", "dev-1", &["development"]))
            .await;
        registry
            .register(agent("dev-2", "dev-2", &["development"]))
            .await;

        registry.deregister("dev-1").await.unwrap();

        let required: HashSet<String> = ["development".to_string()].into_iter().collect();
        let found = registry.discover(&required).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "dev-2");
    }

    #[tokio::test]
    async fn get_unknown_agent_is_not_found() {
        let registry = AgentRegistry::new();
        let result = registry.get("ghost").await;
        assert!(matches!(result, Err(OrchestrationError::UnknownAgent(_))));
    }

    #[tokio::test]
    async fn re_register_same_id_overwrites() {
        let registry = AgentRegistry::new();
        registry
            .register(agent("dev-1", "dev-1", &["development"]))
            .await;
        registry
            .register(agent("dev-1", "dev-1-renamed", &["development", "analysis"]))
            .await;

        assert_eq!(registry.len().await, 1);
        let record = registry.get("dev-1").await.unwrap();
        assert_eq!(record.name, "dev-1-renamed");
    }
}
