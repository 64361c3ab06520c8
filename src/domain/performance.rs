use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::Action;

/// Where a realized outcome came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    /// Matured counterfactual of a rejected decision
    Shadow,
    /// Settlement of an executed decision
    Executed,
}

/// One agent's vote joined with the realized outcome of the decision it supported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub decision_id: Uuid,
    pub agent_id: String,
    pub source: OutcomeSource,
    pub voted_action: Action,
    /// Whether the realized move agreed with the vote's direction
    pub direction_match: bool,
    pub signed_return: Decimal,
    pub stated_confidence: Decimal,
    pub realized_at: DateTime<Utc>,
}
