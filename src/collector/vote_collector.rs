use chrono::Utc;
use futures::FutureExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agents::AgentRegistry;
use crate::domain::{AbstentionReason, AgentScore, Ballot, CastVote, RoundContext, Vote, VoteSet};
use crate::error::{QuorumError, Result};
use crate::persistence::GovernanceStore;

/// Vote collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Hard boundary for the whole round
    #[serde(default = "default_round_deadline_ms")]
    pub round_deadline_ms: u64,
    /// Per-agent budget, never longer than the round deadline in effect
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: u64,
    /// Fewer responders than this fails the round with NoQuorum
    #[serde(default = "default_min_responding_agents")]
    pub min_responding_agents: usize,
}

fn default_round_deadline_ms() -> u64 {
    30_000
}
fn default_agent_timeout_ms() -> u64 {
    20_000
}
fn default_min_responding_agents() -> usize {
    3
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            round_deadline_ms: default_round_deadline_ms(),
            agent_timeout_ms: default_agent_timeout_ms(),
            min_responding_agents: default_min_responding_agents(),
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.round_deadline_ms == 0 {
            errors.push("collector.round_deadline_ms must be positive".to_string());
        }
        if self.agent_timeout_ms == 0 {
            errors.push("collector.agent_timeout_ms must be positive".to_string());
        }
        if self.min_responding_agents == 0 {
            errors.push("collector.min_responding_agents must be at least 1".to_string());
        }
        errors
    }
}

enum Answer {
    Scored(AgentScore),
    Failed(String),
    TimedOut,
    Panicked(String),
}

pub struct VoteCollector {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn GovernanceStore>,
    config: CollectorConfig,
}

impl VoteCollector {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<dyn GovernanceStore>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Gather one ballot per registered agent.
    ///
    /// Every ballot, abstentions included, is appended to the vote log before
    /// the quorum check, so a round that fails with `NoQuorum` still leaves
    /// its votes behind.
    pub async fn collect(&self, ctx: &RoundContext) -> Result<VoteSet> {
        let round_deadline = Duration::from_millis(self.config.round_deadline_ms);
        let agent_timeout =
            Duration::from_millis(self.config.agent_timeout_ms).min(round_deadline);
        let deadline = Instant::now() + round_deadline;

        let mut outstanding: BTreeSet<String> = BTreeSet::new();
        let mut tasks = JoinSet::new();
        for agent in self.registry.agents() {
            let agent = Arc::clone(agent);
            let ctx = ctx.clone();
            let agent_id = agent.id().to_string();
            outstanding.insert(agent_id.clone());

            tasks.spawn(async move {
                let call = AssertUnwindSafe(agent.score(&ctx)).catch_unwind();
                let answer = match tokio::time::timeout(agent_timeout, call).await {
                    Err(_) => Answer::TimedOut,
                    Ok(Err(panic)) => Answer::Panicked(panic_message(panic)),
                    Ok(Ok(Err(e))) => Answer::Failed(e.to_string()),
                    Ok(Ok(Ok(score))) => Answer::Scored(score),
                };
                (agent_id, answer)
            });
        }

        let mut ballots: BTreeMap<String, Ballot> = BTreeMap::new();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((agent_id, answer)))) => {
                    outstanding.remove(&agent_id);
                    let ballot = ballot_for(&agent_id, answer);
                    ballots.insert(agent_id, ballot);
                }
                Ok(Some(Err(e))) => {
                    // Tasks catch their own panics; this is an abort
                    warn!(round_id = %ctx.round_id, error = %e, "agent task ended without an answer");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        round_id = %ctx.round_id,
                        outstanding = outstanding.len(),
                        "round deadline reached; discarding outstanding agent calls"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }
        drop(tasks);

        for agent_id in outstanding {
            warn!(round_id = %ctx.round_id, agent_id = %agent_id, "agent abstained: timeout");
            ballots.insert(
                agent_id,
                Ballot::Abstention {
                    reason: AbstentionReason::Timeout,
                },
            );
        }

        let recorded_at = Utc::now();
        let votes: Vec<Vote> = ballots
            .into_iter()
            .map(|(agent_id, ballot)| Vote {
                round_id: ctx.round_id,
                agent_id,
                ballot,
                recorded_at,
            })
            .collect();
        self.store.append_votes(&votes).await?;

        let set = VoteSet::new(ctx.clone(), votes);
        let responded = set.responded();
        let required = self.config.min_responding_agents;
        if responded < required {
            warn!(
                round_id = %ctx.round_id,
                instrument = %ctx.instrument,
                responded,
                required,
                "round failed closed: no quorum"
            );
            return Err(QuorumError::NoQuorum {
                responded,
                required,
            });
        }

        info!(
            round_id = %ctx.round_id,
            instrument = %ctx.instrument,
            responded,
            abstained = set.abstentions().count(),
            "votes collected"
        );
        Ok(set)
    }
}

fn ballot_for(agent_id: &str, answer: Answer) -> Ballot {
    let reason = match answer {
        Answer::Scored(score) => match validate_score(&score) {
            Ok(()) => {
                debug!(agent_id, action = %score.action, confidence = %score.confidence, "vote cast");
                return Ballot::Cast(CastVote {
                    action: score.action,
                    confidence: score.confidence,
                    rationale: score.rationale,
                    factors: score.factors,
                });
            }
            Err(problem) => AbstentionReason::Malformed(problem),
        },
        Answer::Failed(e) => AbstentionReason::Failed(e),
        Answer::TimedOut => AbstentionReason::Timeout,
        Answer::Panicked(msg) => AbstentionReason::Crashed(msg),
    };
    warn!(agent_id, reason = %reason, "agent abstained");
    Ballot::Abstention { reason }
}

fn validate_score(score: &AgentScore) -> std::result::Result<(), String> {
    if score.confidence < Decimal::ZERO || score.confidence > Decimal::ONE {
        return Err(format!("confidence {} outside [0, 1]", score.confidence));
    }
    Ok(())
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "agent panicked".to_string()
    }
}
