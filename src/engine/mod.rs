//! Round orchestration
//!
//! collect → aggregate → gate → (execute | shadow | approval)
//!
//! Every step leaves a record: votes in the vote log, the decision and each
//! lifecycle state in the decision log, the shadow position for a rejection.
//! `explain` puts those back together for any decision.

pub mod assembly;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::{ApprovalChannel, ExecutionVenue};
use crate::collector::VoteCollector;
use crate::consensus::ConsensusAggregator;
use crate::domain::{
    AccountState, Decision, DecisionState, DecisionStateEntry, RoundContext, RuleViolation,
    Settlement, ShadowPosition, Vote,
};
use crate::error::{QuorumError, Result};
use crate::persistence::GovernanceStore;
use crate::policy::{PolicyGate, Verdict};
use crate::recalibration::WeightBook;
use crate::shadow::CounterfactualTracker;

pub use assembly::{Runtime, RuntimeCollaborators};

/// What happened to a round's decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// Accepted and handed to execution
    Submitted,
    /// Accepted; the action places no order
    NoOrder,
    /// Accepted, but the venue refused it
    ExecutionFailed { reason: String },
    Rejected {
        violations: Vec<RuleViolation>,
        shadow_id: Option<Uuid>,
    },
    /// Waiting for a human; the approval request runs in the background
    PendingApproval { rule_ids: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundOutcome {
    pub decision: Decision,
    pub ruleset_version: u64,
    pub disposition: Disposition,
}

/// Everything recorded about one decision
#[derive(Debug, Clone, Serialize)]
pub struct DecisionAudit {
    pub decision: Decision,
    pub states: Vec<DecisionStateEntry>,
    pub votes: Vec<Vote>,
    pub shadow: Option<ShadowPosition>,
}

impl DecisionAudit {
    /// Most recent lifecycle state
    pub fn current_state(&self) -> Option<&DecisionState> {
        self.states.last().map(|e| &e.state)
    }
}

pub struct EngineComponents {
    pub store: Arc<dyn GovernanceStore>,
    pub collector: VoteCollector,
    pub aggregator: ConsensusAggregator,
    pub gate: Arc<PolicyGate>,
    pub weights: Arc<WeightBook>,
    pub tracker: Arc<CounterfactualTracker>,
    pub execution: Arc<dyn ExecutionVenue>,
    pub approvals: Arc<dyn ApprovalChannel>,
}

pub struct GovernanceEngine {
    store: Arc<dyn GovernanceStore>,
    collector: VoteCollector,
    aggregator: ConsensusAggregator,
    gate: Arc<PolicyGate>,
    weights: Arc<WeightBook>,
    tracker: Arc<CounterfactualTracker>,
    execution: Arc<dyn ExecutionVenue>,
    approvals: Arc<dyn ApprovalChannel>,
}

impl GovernanceEngine {
    pub fn new(components: EngineComponents) -> Self {
        Self {
            store: components.store,
            collector: components.collector,
            aggregator: components.aggregator,
            gate: components.gate,
            weights: components.weights,
            tracker: components.tracker,
            execution: components.execution,
            approvals: components.approvals,
        }
    }

    pub fn gate(&self) -> &PolicyGate {
        &self.gate
    }

    pub fn weights(&self) -> &WeightBook {
        &self.weights
    }

    /// Give every registered agent its initial weight if it has none yet.
    pub async fn register_agents(&self) -> Result<()> {
        for agent_id in self.collector.registry().ids() {
            self.weights.register(agent_id).await?;
        }
        Ok(())
    }

    async fn record(&self, decision_id: Uuid, state: DecisionState) -> Result<()> {
        self.store
            .append_decision_state(&DecisionStateEntry::now(decision_id, state))
            .await
    }

    /// Run one decision round.
    ///
    /// Errors: `IntegrityViolation` when the gate is frozen (nothing is
    /// collected), `NoQuorum` when too few agents answered (votes are kept,
    /// no decision is recorded).
    pub async fn run_round(&self, ctx: RoundContext, account: &AccountState) -> Result<RoundOutcome> {
        self.gate.ruleset()?;

        let votes = self.collector.collect(&ctx).await?;
        let weights = self.weights.snapshot();
        let decision = self.aggregator.aggregate(&votes, &weights);

        self.store.append_decision(&decision).await?;
        self.record(decision.id, DecisionState::Proposed).await?;

        let verdict = self.gate.evaluate(&decision, account)?;
        let version = verdict.ruleset_version;

        let disposition = match verdict.verdict {
            Verdict::Accept => {
                self.record(
                    decision.id,
                    DecisionState::Accepted {
                        ruleset_version: version,
                    },
                )
                .await?;
                self.execute(&decision).await?
            }
            Verdict::Reject { violations, .. } => {
                let shadow = self.tracker.open(&decision, &violations).await;
                let shadow_id = shadow.as_ref().ok().map(|p| p.id);
                self.record(
                    decision.id,
                    DecisionState::Rejected {
                        ruleset_version: version,
                        violations: violations.clone(),
                        shadow_id,
                    },
                )
                .await?;
                if let Err(e) = shadow {
                    error!(decision_id = %decision.id, error = %e, "failed to open shadow position");
                    return Err(e);
                }
                info!(
                    decision_id = %decision.id,
                    rules = ?violations.iter().map(|v| v.rule_id.as_str()).collect::<Vec<_>>(),
                    "decision rejected"
                );
                Disposition::Rejected {
                    violations,
                    shadow_id,
                }
            }
            Verdict::PendingApproval { rule_ids } => {
                self.record(
                    decision.id,
                    DecisionState::PendingApproval {
                        ruleset_version: version,
                        rule_ids: rule_ids.clone(),
                    },
                )
                .await?;
                self.request_approval(&decision, &rule_ids);
                Disposition::PendingApproval { rule_ids }
            }
        };

        Ok(RoundOutcome {
            decision,
            ruleset_version: version,
            disposition,
        })
    }

    async fn execute(&self, decision: &Decision) -> Result<Disposition> {
        if !decision.action.places_order() {
            info!(decision_id = %decision.id, action = %decision.action, "accepted; no order to place");
            return Ok(Disposition::NoOrder);
        }

        match self.execution.submit(decision).await {
            Ok(()) => {
                self.record(decision.id, DecisionState::Submitted).await?;
                info!(
                    decision_id = %decision.id,
                    instrument = %decision.instrument,
                    action = %decision.action,
                    notional = %decision.notional,
                    "decision submitted"
                );
                Ok(Disposition::Submitted)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(decision_id = %decision.id, error = %reason, "execution refused decision");
                self.record(
                    decision.id,
                    DecisionState::ExecutionFailed {
                        reason: reason.clone(),
                    },
                )
                .await?;
                Ok(Disposition::ExecutionFailed { reason })
            }
        }
    }

    /// Ask for approval off the round path. The answer is recorded, never acted on.
    fn request_approval(&self, decision: &Decision, rule_ids: &[String]) {
        let approvals = Arc::clone(&self.approvals);
        let store = Arc::clone(&self.store);
        let decision = decision.clone();
        let rule_ids = rule_ids.to_vec();

        tokio::spawn(async move {
            match approvals.request_approval(&decision, &rule_ids).await {
                Ok(response) => {
                    info!(
                        decision_id = %decision.id,
                        approved = response.approved,
                        approver = %response.approver,
                        "approval answered"
                    );
                    let entry = DecisionStateEntry::now(
                        decision.id,
                        DecisionState::ApprovalResolved {
                            approved: response.approved,
                            approver: response.approver,
                            reason: response.reason,
                        },
                    );
                    if let Err(e) = store.append_decision_state(&entry).await {
                        error!(decision_id = %decision.id, error = %e, "failed to record approval answer");
                    }
                }
                Err(e) => {
                    warn!(decision_id = %decision.id, error = %e, "approval request ended without an answer");
                }
            }
        });
    }

    /// Who voted what, what the gate said, and what became of it.
    pub async fn explain(&self, decision_id: Uuid) -> Result<DecisionAudit> {
        let decision = self
            .store
            .decision(decision_id)
            .await?
            .ok_or_else(|| QuorumError::NotFound(format!("decision {}", decision_id)))?;
        Ok(DecisionAudit {
            states: self.store.decision_states(decision_id).await?,
            votes: self.store.votes_for_round(decision_id).await?,
            shadow: self.store.shadow_for_decision(decision_id).await?,
            decision,
        })
    }

    /// Report the realized return of a submitted decision.
    pub async fn record_settlement(
        &self,
        decision_id: Uuid,
        realized_return: Decimal,
        settled_at: DateTime<Utc>,
    ) -> Result<Settlement> {
        let states = self.store.decision_states(decision_id).await?;
        if states.is_empty() {
            return Err(QuorumError::NotFound(format!("decision {}", decision_id)));
        }
        if !states
            .iter()
            .any(|e| matches!(e.state, DecisionState::Submitted))
        {
            return Err(QuorumError::InvalidStateTransition {
                from: states
                    .last()
                    .map(|e| e.state.name().to_string())
                    .unwrap_or_default(),
                to: "settled".to_string(),
            });
        }

        let settlement = Settlement {
            decision_id,
            realized_return,
            settled_at,
        };
        self.store.record_settlement(&settlement).await?;
        info!(%decision_id, %realized_return, "settlement recorded");
        Ok(settlement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        ApprovalResponse, DryRunExecution, ManualApprovalDesk, MockExecutionVenue, StaticPriceFeed,
    };
    use crate::agents::{AgentKind, AgentRegistry, ScriptedAgent};
    use crate::collector::CollectorConfig;
    use crate::domain::{Action, QuorumTable};
    use crate::persistence::InMemoryStore;
    use crate::policy::{Constraint, PolicyConfig, PolicyRule};
    use crate::recalibration::WeightsConfig;
    use crate::shadow::ShadowConfig;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        engine: GovernanceEngine,
        store: Arc<InMemoryStore>,
        desk: ManualApprovalDesk,
    }

    fn rules() -> Vec<PolicyRule> {
        vec![
            PolicyRule::hard(
                "max-order-10pct",
                Constraint::MaxOrderFraction {
                    max_fraction: dec!(0.10),
                },
            ),
            PolicyRule::approval(
                "dca-review",
                Constraint::ActionIn {
                    actions: vec![Action::Dca],
                },
            ),
        ]
    }

    fn registry(votes: &[(&str, Action, Decimal)]) -> AgentRegistry {
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

    fn scenario_a() -> Vec<(&'static str, Action, Decimal)> {
        vec![
            ("a1", Action::Buy, dec!(0.8)),
            ("a2", Action::Buy, dec!(0.7)),
            ("a3", Action::Buy, dec!(0.9)),
            ("a4", Action::Hold, dec!(0.6)),
            ("a5", Action::Hold, dec!(0.6)),
        ]
    }

    async fn harness_with(
        store: Arc<InMemoryStore>,
        votes: &[(&str, Action, Decimal)],
        execution: Arc<dyn ExecutionVenue>,
    ) -> Harness {
        let dyn_store: Arc<dyn GovernanceStore> = store.clone();
        let prices = StaticPriceFeed::new();
        prices.set_price("AAPL", dec!(100)).await;
        let desk = ManualApprovalDesk::new();

        let weights = Arc::new(
            WeightBook::load(dyn_store.clone(), &WeightsConfig::default())
                .await
                .unwrap(),
        );
        let gate = Arc::new(
            PolicyGate::load(dyn_store.clone(), &PolicyConfig::default(), Some(rules()))
                .await
                .unwrap(),
        );
        let tracker = Arc::new(CounterfactualTracker::new(
            dyn_store.clone(),
            Arc::new(prices),
            ShadowConfig::default(),
        ));

        let engine = GovernanceEngine::new(EngineComponents {
            store: dyn_store.clone(),
            collector: VoteCollector::new(
                Arc::new(registry(votes)),
                dyn_store.clone(),
                CollectorConfig::default(),
            ),
            aggregator: ConsensusAggregator::new(QuorumTable::default()).unwrap(),
            gate,
            weights,
            tracker,
            execution,
            approvals: Arc::new(desk.clone()),
        });
        engine.register_agents().await.unwrap();

        Harness {
            engine,
            store,
            desk,
        }
    }

    async fn harness(
        votes: &[(&str, Action, Decimal)],
        execution: Arc<dyn ExecutionVenue>,
    ) -> Harness {
        harness_with(Arc::new(InMemoryStore::new()), votes, execution).await
    }

    fn account() -> AccountState {
        AccountState::new(dec!(100000), dec!(50000))
    }

    fn state_names(audit: &DecisionAudit) -> Vec<&'static str> {
        audit.states.iter().map(|e| e.state.name()).collect()
    }

    #[tokio::test]
    async fn test_accepted_buy_is_submitted() {
        let execution = DryRunExecution::new();
        let h = harness(&scenario_a(), Arc::new(execution.clone())).await;

        let ctx = RoundContext::new("AAPL", dec!(5000));
        let outcome = h.engine.run_round(ctx.clone(), &account()).await.unwrap();

        assert_eq!(outcome.decision.id, ctx.round_id);
        assert_eq!(outcome.decision.action, Action::Buy);
        assert_eq!(outcome.decision.confidence, dec!(0.8));
        assert_eq!(outcome.disposition, Disposition::Submitted);
        assert_eq!(execution.submitted().await, vec![ctx.round_id]);

        let audit = h.engine.explain(ctx.round_id).await.unwrap();
        assert_eq!(state_names(&audit), vec!["proposed", "accepted", "submitted"]);
        assert_eq!(audit.votes.len(), 5);
        assert!(audit.shadow.is_none());
    }

    #[tokio::test]
    async fn test_oversized_order_rejected_into_shadow() {
        let execution = DryRunExecution::new();
        let h = harness(&scenario_a(), Arc::new(execution.clone())).await;

        let ctx = RoundContext::new("AAPL", dec!(20000));
        let outcome = h.engine.run_round(ctx.clone(), &account()).await.unwrap();

        let Disposition::Rejected {
            violations,
            shadow_id,
        } = &outcome.disposition
        else {
            panic!("expected rejection, got {:?}", outcome.disposition);
        };
        assert_eq!(violations[0].rule_id, "max-order-10pct");
        assert!(shadow_id.is_some());
        assert!(execution.submitted().await.is_empty());

        let audit = h.engine.explain(ctx.round_id).await.unwrap();
        assert_eq!(state_names(&audit), vec!["proposed", "rejected"]);
        let shadow = audit.shadow.unwrap();
        assert_eq!(Some(shadow.id), *shadow_id);
        assert_eq!(shadow.entry_price, Some(dec!(100)));
        assert_eq!(shadow.horizon_periods, 7);
    }

    #[tokio::test]
    async fn test_flat_decision_places_no_order() {
        let votes: Vec<_> = ["h1", "h2", "h3"]
            .iter()
            .map(|id| (*id, Action::Hold, dec!(0.6)))
            .collect();
        let execution = DryRunExecution::new();
        let h = harness(&votes, Arc::new(execution.clone())).await;

        let outcome = h
            .engine
            .run_round(RoundContext::new("AAPL", dec!(5000)), &account())
            .await
            .unwrap();
        assert_eq!(outcome.disposition, Disposition::NoOrder);
        assert_eq!(outcome.decision.notional, Decimal::ZERO);
        assert!(execution.submitted().await.is_empty());
    }

    #[tokio::test]
    async fn test_execution_failure_is_recorded() {
        let mut venue = MockExecutionVenue::new();
        venue
            .expect_submit()
            .times(1)
            .returning(|_| Err(QuorumError::Internal("venue down".into())));
        let h = harness(&scenario_a(), Arc::new(venue)).await;

        let ctx = RoundContext::new("AAPL", dec!(5000));
        let outcome = h.engine.run_round(ctx.clone(), &account()).await.unwrap();
        assert!(matches!(
            outcome.disposition,
            Disposition::ExecutionFailed { ref reason } if reason.contains("venue down")
        ));

        let audit = h.engine.explain(ctx.round_id).await.unwrap();
        assert_eq!(state_names(&audit), vec!["proposed", "accepted", "execution_failed"]);
    }

    #[tokio::test]
    async fn test_pending_approval_records_answer_without_executing() {
        let votes: Vec<_> = ["d1", "d2", "d3"]
            .iter()
            .map(|id| (*id, Action::Dca, dec!(0.7)))
            .collect();
        let execution = DryRunExecution::new();
        let h = harness(&votes, Arc::new(execution.clone())).await;

        let ctx = RoundContext::new("AAPL", dec!(5000));
        let outcome = h.engine.run_round(ctx.clone(), &account()).await.unwrap();
        assert_eq!(
            outcome.disposition,
            Disposition::PendingApproval {
                rule_ids: vec!["dca-review".to_string()]
            }
        );

        let mut waited = 0;
        while h.desk.pending().await.is_empty() {
            waited += 1;
            assert!(waited < 200, "approval request never arrived");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.desk
            .resolve(
                ctx.round_id,
                ApprovalResponse {
                    approved: true,
                    approver: "risk-officer".into(),
                    reason: "sized sensibly".into(),
                },
            )
            .await
            .unwrap();

        let mut waited = 0;
        loop {
            let audit = h.engine.explain(ctx.round_id).await.unwrap();
            if audit.states.len() == 3 {
                assert_eq!(
                    state_names(&audit),
                    vec!["proposed", "pending_approval", "approval_resolved"]
                );
                break;
            }
            waited += 1;
            assert!(waited < 200, "approval answer never recorded");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(execution.submitted().await.is_empty());
    }

    #[tokio::test]
    async fn test_frozen_gate_stops_round_before_collection() {
        let store = Arc::new(InMemoryStore::new());
        let dyn_store: Arc<dyn GovernanceStore> = store.clone();
        PolicyGate::load(dyn_store, &PolicyConfig::default(), Some(rules()))
            .await
            .unwrap();
        store
            .tamper_latest_ruleset(|doc| doc.replace("0.10", "0.90"))
            .await;

        let h = harness_with(store, &scenario_a(), Arc::new(DryRunExecution::new())).await;
        assert!(h.engine.gate().is_frozen());

        let err = h
            .engine
            .run_round(RoundContext::new("AAPL", dec!(5000)), &account())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(h.store.vote_count().await, 0);
        assert_eq!(h.store.decision_count().await, 0);
    }

    #[tokio::test]
    async fn test_settlement_requires_submitted_decision() {
        let h = harness(&scenario_a(), Arc::new(DryRunExecution::new())).await;

        let submitted = RoundContext::new("AAPL", dec!(5000));
        h.engine.run_round(submitted.clone(), &account()).await.unwrap();
        let rejected = RoundContext::new("AAPL", dec!(20000));
        h.engine.run_round(rejected.clone(), &account()).await.unwrap();

        let settlement = h
            .engine
            .record_settlement(submitted.round_id, dec!(0.03), chrono::Utc::now())
            .await
            .unwrap();
        assert_eq!(settlement.realized_return, dec!(0.03));

        let err = h
            .engine
            .record_settlement(rejected.round_id, dec!(0.03), chrono::Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, QuorumError::InvalidStateTransition { .. }));

        let err = h
            .engine
            .record_settlement(Uuid::new_v4(), dec!(0.03), chrono::Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, QuorumError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_explain_unknown_decision() {
        let h = harness(&scenario_a(), Arc::new(DryRunExecution::new())).await;
        let err = h.engine.explain(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, QuorumError::NotFound(_)));
    }
}
