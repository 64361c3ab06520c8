//! Wiring of the engine and its background jobs from configuration

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::{EngineComponents, GovernanceEngine};
use crate::adapters::{ApprovalChannel, ExecutionVenue, MarketData, Notifier};
use crate::agents::AgentRegistry;
use crate::attribution::PerformanceAttributor;
use crate::collector::VoteCollector;
use crate::config::AppConfig;
use crate::consensus::ConsensusAggregator;
use crate::error::{QuorumError, Result};
use crate::persistence::GovernanceStore;
use crate::policy::{PolicyGate, PolicyRule, RulesetFile};
use crate::recalibration::{Recalibrator, WeightBook};
use crate::scheduler::Scheduler;
use crate::shadow::CounterfactualTracker;

/// Outside systems the engine talks to
pub struct RuntimeCollaborators {
    pub market: Arc<dyn MarketData>,
    pub execution: Arc<dyn ExecutionVenue>,
    pub approvals: Arc<dyn ApprovalChannel>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct Runtime {
    pub engine: Arc<GovernanceEngine>,
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<dyn GovernanceStore>,
}

/// Read the genesis ruleset file, if one is configured and present.
pub async fn load_genesis(path: Option<&str>) -> Result<Option<Vec<PolicyRule>>> {
    let Some(path) = path else {
        return Ok(None);
    };
    if !Path::new(path).exists() {
        warn!(path, "genesis ruleset file not found");
        return Ok(None);
    }
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(Some(RulesetFile::parse(&raw)?))
}

impl Runtime {
    pub async fn build(
        config: &AppConfig,
        store: Arc<dyn GovernanceStore>,
        registry: AgentRegistry,
        collaborators: RuntimeCollaborators,
    ) -> Result<Self> {
        let genesis = load_genesis(config.policy.genesis_file.as_deref()).await?;
        Self::build_with_genesis(config, store, registry, collaborators, genesis).await
    }

    pub async fn build_with_genesis(
        config: &AppConfig,
        store: Arc<dyn GovernanceStore>,
        registry: AgentRegistry,
        collaborators: RuntimeCollaborators,
        genesis: Option<Vec<PolicyRule>>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| QuorumError::InvalidConfig(errors.join("; ")))?;

        let weights = Arc::new(WeightBook::load(store.clone(), &config.weights).await?);
        let gate = Arc::new(PolicyGate::load(store.clone(), &config.policy, genesis).await?);
        let tracker = Arc::new(CounterfactualTracker::new(
            store.clone(),
            collaborators.market,
            config.shadow.clone(),
        ));
        let recalibrator = Arc::new(Recalibrator::new(
            store.clone(),
            weights.clone(),
            collaborators.notifier,
            config.recalibration.clone(),
        )?);
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            tracker.clone(),
            Arc::new(PerformanceAttributor::new(store.clone())),
            recalibrator,
            config.scheduler.clone(),
        ));

        let agents = registry.len();
        let engine = GovernanceEngine::new(EngineComponents {
            store: store.clone(),
            collector: VoteCollector::new(
                Arc::new(registry),
                store.clone(),
                config.collector.clone(),
            ),
            aggregator: ConsensusAggregator::new(config.consensus.quorum_table()?)?,
            gate,
            weights,
            tracker,
            execution: collaborators.execution,
            approvals: collaborators.approvals,
        });
        engine.register_agents().await?;

        info!(
            agents,
            gate = ?engine.gate().state(),
            weight_generation = engine.weights().generation(),
            "governance engine ready"
        );

        Ok(Self {
            engine: Arc::new(engine),
            scheduler,
            store,
        })
    }
}
