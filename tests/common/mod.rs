#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::Mutex;

use quorum::adapters::{
    DryRunExecution, FlagKind, ManualApprovalDesk, Notifier, StaticPriceFeed,
};
use quorum::agents::{AgentKind, AgentRegistry, ScriptedAgent};
use quorum::domain::Action;
use quorum::policy::{Constraint, PolicyRule};
use quorum::{AppConfig, GovernanceStore, InMemoryStore, Runtime, RuntimeCollaborators};

/// Notifier that remembers every flag it was handed
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub flags: Arc<Mutex<Vec<(String, FlagKind)>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, agent_id: &str, flag: FlagKind, _details: &str) -> Result<(), String> {
        self.flags.lock().await.push((agent_id.to_string(), flag));
        Ok(())
    }
}

pub struct TestBed {
    pub runtime: Runtime,
    pub store: Arc<InMemoryStore>,
    pub prices: StaticPriceFeed,
    pub execution: DryRunExecution,
    pub desk: ManualApprovalDesk,
    pub notifier: RecordingNotifier,
}

pub fn genesis_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule::hard(
            "max-order-10pct",
            Constraint::MaxOrderFraction {
                max_fraction: dec!(0.10),
            },
        ),
        PolicyRule::approval(
            "large-order-review",
            Constraint::NotionalAbove {
                threshold: dec!(500000),
            },
        ),
    ]
}

pub fn registry(votes: &[(&str, Action, Decimal)]) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for (id, action, confidence) in votes {
        registry
            .register(Arc::new(ScriptedAgent::voting(
                id,
                AgentKind::Technical,
                *action,
                *confidence,
            )))
            .unwrap();
    }
    registry
}

pub async fn test_bed(registry: AgentRegistry) -> TestBed {
    test_bed_on(Arc::new(InMemoryStore::new()), registry, AppConfig::default()).await
}

pub async fn test_bed_on(
    store: Arc<InMemoryStore>,
    registry: AgentRegistry,
    config: AppConfig,
) -> TestBed {
    let prices = StaticPriceFeed::new();
    prices.set_price("AAPL", dec!(100)).await;
    let execution = DryRunExecution::new();
    let desk = ManualApprovalDesk::new();
    let notifier = RecordingNotifier::default();

    let dyn_store: Arc<dyn GovernanceStore> = store.clone();
    let runtime = Runtime::build_with_genesis(
        &config,
        dyn_store,
        registry,
        RuntimeCollaborators {
            market: Arc::new(prices.clone()),
            execution: Arc::new(execution.clone()),
            approvals: Arc::new(desk.clone()),
            notifier: Arc::new(notifier.clone()),
        },
        Some(genesis_rules()),
    )
    .await
    .unwrap();

    TestBed {
        runtime,
        store,
        prices,
        execution,
        desk,
        notifier,
    }
}
