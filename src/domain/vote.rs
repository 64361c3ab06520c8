//! Votes, abstentions and the per-round vote set

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::action::Action;

/// Everything an agent is told about the round it is voting in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundContext {
    pub round_id: Uuid,
    /// Candidate instrument (ticker, symbol)
    pub instrument: String,
    /// Logical round time; also the decision timestamp
    pub as_of: DateTime<Utc>,
    /// Proposed order size in account currency
    pub proposed_notional: Decimal,
    /// Free-form hints forwarded to agents untouched
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RoundContext {
    pub fn new(instrument: impl Into<String>, proposed_notional: Decimal) -> Self {
        Self {
            round_id: Uuid::new_v4(),
            instrument: instrument.into(),
            as_of: Utc::now(),
            proposed_notional,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Raw response returned by an agent's `score()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentScore {
    pub action: Action,
    /// Expected in [0, 1]; anything else is treated as malformed
    pub confidence: Decimal,
    pub rationale: String,
    /// Agent-defined payload, never interpreted by the engine
    #[serde(default)]
    pub factors: serde_json::Value,
}

impl AgentScore {
    pub fn new(action: Action, confidence: Decimal, rationale: &str) -> Self {
        Self {
            action,
            confidence,
            rationale: rationale.to_string(),
            factors: serde_json::Value::Null,
        }
    }
}

/// A vote that was actually cast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastVote {
    pub action: Action,
    pub confidence: Decimal,
    pub rationale: String,
    pub factors: serde_json::Value,
}

/// Why an agent did not take part in a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AbstentionReason {
    /// No answer before the round deadline
    Timeout,
    /// `score()` returned an error
    Failed(String),
    /// Answer violated the vote contract
    Malformed(String),
    /// The agent task panicked or was aborted
    Crashed(String),
}

impl std::fmt::Display for AbstentionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbstentionReason::Timeout => write!(f, "timeout"),
            AbstentionReason::Failed(e) => write!(f, "failed: {}", e),
            AbstentionReason::Malformed(e) => write!(f, "malformed: {}", e),
            AbstentionReason::Crashed(e) => write!(f, "crashed: {}", e),
        }
    }
}

/// One agent's contribution to a round: either a vote or an abstention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ballot", rename_all = "snake_case")]
pub enum Ballot {
    Cast(CastVote),
    Abstention { reason: AbstentionReason },
}

impl Ballot {
    pub fn cast(&self) -> Option<&CastVote> {
        match self {
            Ballot::Cast(v) => Some(v),
            Ballot::Abstention { .. } => None,
        }
    }

    pub fn is_abstention(&self) -> bool {
        matches!(self, Ballot::Abstention { .. })
    }
}

/// Write-once vote record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub round_id: Uuid,
    pub agent_id: String,
    pub ballot: Ballot,
    pub recorded_at: DateTime<Utc>,
}

/// All ballots of one round, ordered by agent id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteSet {
    pub round: RoundContext,
    votes: Vec<Vote>,
}

impl VoteSet {
    pub fn new(round: RoundContext, mut votes: Vec<Vote>) -> Self {
        votes.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Self { round, votes }
    }

    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    /// Votes that were cast, with their agent id
    pub fn participating(&self) -> impl Iterator<Item = (&str, &CastVote)> {
        self.votes
            .iter()
            .filter_map(|v| v.ballot.cast().map(|c| (v.agent_id.as_str(), c)))
    }

    pub fn abstentions(&self) -> impl Iterator<Item = &Vote> {
        self.votes.iter().filter(|v| v.ballot.is_abstention())
    }

    pub fn responded(&self) -> usize {
        self.participating().count()
    }
}
