//! Decisions and their append-only lifecycle states

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::Action;

/// A cast vote together with the weight it carried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedVote {
    pub agent_id: String,
    pub action: Action,
    pub confidence: Decimal,
    pub weight: Decimal,
}

/// Weighted agreement for one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTally {
    pub action: Action,
    pub voters: usize,
    pub weight: Decimal,
    /// weight / total participating weight
    pub fraction: Decimal,
    pub threshold: Decimal,
    pub qualified: bool,
}

/// Which rule picked the winning action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakRule {
    /// Exactly one action qualified
    SoleQualifier,
    /// Several qualified; one had a strictly higher fraction
    HigherFraction,
    /// Equal fractions; the lower quorum requirement won
    LowerQuorum,
    /// Equal fraction and quorum; canonical action order decided
    CanonicalOrder,
    /// Nothing qualified; defaulted to HOLD
    NoConsensus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieBreakRecord {
    pub rule: TieBreakRule,
    /// Every qualifying action, best first
    pub contenders: Vec<Action>,
}

/// The aggregate outcome of one round. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Same as the round id: one decision per round
    pub id: Uuid,
    pub instrument: String,
    pub action: Action,
    /// Weighted mean confidence of the supporting votes
    pub confidence: Decimal,
    pub notional: Decimal,
    pub no_consensus: bool,
    pub tallies: Vec<ActionTally>,
    pub constituents: Vec<WeightedVote>,
    /// Agents that abstained this round
    pub abstained: Vec<String>,
    pub tie_break: TieBreakRecord,
    /// Generation of the weight table the decision was computed with
    pub weight_generation: u64,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    /// Votes on the winning side
    pub fn supporters(&self) -> impl Iterator<Item = &WeightedVote> {
        self.constituents.iter().filter(move |v| v.action == self.action)
    }
}

/// A single rule failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule_id: String,
    pub detail: String,
}

/// Lifecycle entries appended to the decision log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DecisionState {
    Proposed,
    Accepted {
        ruleset_version: u64,
    },
    Rejected {
        ruleset_version: u64,
        violations: Vec<RuleViolation>,
        shadow_id: Option<Uuid>,
    },
    PendingApproval {
        ruleset_version: u64,
        rule_ids: Vec<String>,
    },
    ApprovalResolved {
        approved: bool,
        approver: String,
        reason: String,
    },
    Submitted,
    ExecutionFailed {
        reason: String,
    },
}

impl DecisionState {
    pub fn name(&self) -> &'static str {
        match self {
            DecisionState::Proposed => "proposed",
            DecisionState::Accepted { .. } => "accepted",
            DecisionState::Rejected { .. } => "rejected",
            DecisionState::PendingApproval { .. } => "pending_approval",
            DecisionState::ApprovalResolved { .. } => "approval_resolved",
            DecisionState::Submitted => "submitted",
            DecisionState::ExecutionFailed { .. } => "execution_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionStateEntry {
    pub decision_id: Uuid,
    pub state: DecisionState,
    pub recorded_at: DateTime<Utc>,
}

impl DecisionStateEntry {
    pub fn now(decision_id: Uuid, state: DecisionState) -> Self {
        Self {
            decision_id,
            state,
            recorded_at: Utc::now(),
        }
    }
}

/// Realized outcome of an executed decision, reported by the execution side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub decision_id: Uuid,
    /// Return in the decision's direction (positive = the call was right)
    pub realized_return: Decimal,
    pub settled_at: DateTime<Utc>,
}
