//! Counterfactual positions opened for rejected decisions

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::{Action, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShadowStatus {
    Open,
    Matured,
    Cancelled,
}

impl ShadowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowStatus::Open => "OPEN",
            ShadowStatus::Matured => "MATURED",
            ShadowStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ShadowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ShadowStatus {
    type Err = crate::error::QuorumError;

    fn from_str(raw: &str) -> crate::error::Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(ShadowStatus::Open),
            "MATURED" => Ok(ShadowStatus::Matured),
            "CANCELLED" => Ok(ShadowStatus::Cancelled),
            other => Err(crate::error::QuorumError::Validation(format!(
                "unknown shadow status '{}'",
                other
            ))),
        }
    }
}

/// How a matured shadow position judged the rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowOutcome {
    /// The rejected trade would have lost money
    DefensiveWin,
    /// The rejected trade would have gained more than the materiality threshold
    MissedOpportunity,
    Neutral,
    /// No price could be obtained within the retry bound
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowPosition {
    pub id: Uuid,
    pub decision_id: Uuid,
    pub instrument: String,
    pub action: Action,
    pub notional: Decimal,
    /// Rule ids that caused the rejection
    pub rejected_by: Vec<String>,
    /// Synthetic entry; None only when the position was cancelled at open
    pub entry_price: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub horizon_periods: u32,
    pub matures_at: DateTime<Utc>,
    pub status: ShadowStatus,
    /// Failed price lookups at maturity so far
    pub resolution_attempts: u32,
    pub exit_price: Option<Decimal>,
    /// Return in the rejected action's direction
    pub realized_return: Option<Decimal>,
    pub outcome: Option<ShadowOutcome>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl ShadowPosition {
    pub fn is_open(&self) -> bool {
        self.status == ShadowStatus::Open
    }

    pub fn direction(&self) -> Direction {
        self.action.direction()
    }
}
