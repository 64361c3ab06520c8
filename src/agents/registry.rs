use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::traits::{AgentKind, ScoringAgent};
use crate::error::{QuorumError, Result};

/// Startup-built lookup table of the agents that vote
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Arc<dyn ScoringAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Arc<dyn ScoringAgent>) -> Result<()> {
        let id = agent.id().trim().to_string();
        if id.is_empty() {
            return Err(QuorumError::Validation("agent id must not be empty".into()));
        }
        if self.agents.contains_key(&id) {
            return Err(QuorumError::Validation(format!(
                "agent '{}' registered twice",
                id
            )));
        }
        info!(agent_id = %id, kind = %agent.kind(), "agent registered");
        self.agents.insert(id, agent);
        Ok(())
    }

    pub fn with(mut self, agent: Arc<dyn ScoringAgent>) -> Result<Self> {
        self.register(agent)?;
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ScoringAgent>> {
        self.agents.get(id).cloned()
    }

    /// Agents in id order
    pub fn agents(&self) -> impl Iterator<Item = &Arc<dyn ScoringAgent>> {
        self.agents.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    pub fn by_kind(&self, kind: AgentKind) -> Vec<Arc<dyn ScoringAgent>> {
        self.agents
            .values()
            .filter(|a| a.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ScriptedAgent;
    use crate::domain::Action;
    use rust_decimal_macros::dec;

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(ScriptedAgent::voting("risk", AgentKind::Risk, Action::Hold, dec!(0.5))))
            .unwrap();
        let err = registry
            .register(Arc::new(ScriptedAgent::voting("risk", AgentKind::Risk, Action::Buy, dec!(0.9))))
            .unwrap_err();
        assert!(matches!(err, QuorumError::Validation(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_by_kind() {
        let registry = AgentRegistry::new()
            .with(Arc::new(ScriptedAgent::voting("tech-1", AgentKind::Technical, Action::Buy, dec!(0.7))))
            .unwrap()
            .with(Arc::new(ScriptedAgent::voting("macro", AgentKind::Macro, Action::Hold, dec!(0.6))))
            .unwrap()
            .with(Arc::new(ScriptedAgent::voting("tech-2", AgentKind::Technical, Action::Sell, dec!(0.6))))
            .unwrap();
        assert_eq!(registry.by_kind(AgentKind::Technical).len(), 2);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["macro", "tech-1", "tech-2"]);
    }
}
