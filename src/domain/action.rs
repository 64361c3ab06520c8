//! Voting actions and their quorum rules
//!
//! The action set is closed. Every action carries a fixed quorum threshold:
//! the minimum weighted-agreement fraction it needs before it can be chosen.
//! Thresholds may be tuned, but their ordering may not:
//! `STOP_LOSS <= BUY/SELL <= DCA` (fast exits, majority entries, unanimous adds).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{QuorumError, Result};

/// A directional action an agent can vote for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
    Increase,
    Reduce,
    Maintain,
    Dca,
    StopLoss,
}

/// Exposure direction implied by an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Adds long exposure
    Long,
    /// Removes exposure (exit or trim)
    Short,
    /// No order
    Flat,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Buy,
        Action::Sell,
        Action::Hold,
        Action::Increase,
        Action::Reduce,
        Action::Maintain,
        Action::Dca,
        Action::StopLoss,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
            Action::Increase => "INCREASE",
            Action::Reduce => "REDUCE",
            Action::Maintain => "MAINTAIN",
            Action::Dca => "DCA",
            Action::StopLoss => "STOP_LOSS",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Action::Buy | Action::Increase | Action::Dca => Direction::Long,
            Action::Sell | Action::Reduce | Action::StopLoss => Direction::Short,
            Action::Hold | Action::Maintain => Direction::Flat,
        }
    }

    /// Whether the action deploys new capital
    pub fn is_entry(&self) -> bool {
        self.direction() == Direction::Long
    }

    /// Whether the action produces an order at all
    pub fn places_order(&self) -> bool {
        self.direction() != Direction::Flat
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = QuorumError;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| QuorumError::Validation(format!("unknown action '{}'", raw)))
    }
}

/// Per-action quorum thresholds, validated against the structural ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumTable {
    thresholds: BTreeMap<Action, Decimal>,
}

impl Default for QuorumTable {
    fn default() -> Self {
        let thresholds = Action::ALL
            .iter()
            .map(|a| (*a, default_threshold(*a)))
            .collect();
        Self { thresholds }
    }
}

fn default_threshold(action: Action) -> Decimal {
    match action {
        Action::StopLoss => dec!(0.20),
        Action::Reduce => dec!(0.40),
        Action::Hold | Action::Maintain => dec!(0.50),
        Action::Buy | Action::Sell => dec!(0.60),
        Action::Increase => dec!(0.75),
        Action::Dca => dec!(1.00),
    }
}

impl QuorumTable {
    /// Build a table from the defaults with selected actions overridden.
    pub fn with_overrides(overrides: &BTreeMap<String, Decimal>) -> Result<Self> {
        let mut table = Self::default();
        for (name, threshold) in overrides {
            let action = Action::from_str(name)?;
            table.thresholds.insert(action, *threshold);
        }
        table.validate()?;
        Ok(table)
    }

    pub fn threshold(&self, action: Action) -> Decimal {
        self.thresholds
            .get(&action)
            .copied()
            .unwrap_or_else(|| default_threshold(action))
    }

    pub fn validate(&self) -> Result<()> {
        for action in Action::ALL {
            let t = self.threshold(action);
            if t <= Decimal::ZERO || t > Decimal::ONE {
                return Err(QuorumError::InvalidConfig(format!(
                    "quorum threshold for {} must be in (0, 1], got {}",
                    action, t
                )));
            }
        }

        let stop = self.threshold(Action::StopLoss);
        let dca = self.threshold(Action::Dca);
        for entry in [Action::Buy, Action::Sell] {
            let t = self.threshold(entry);
            if stop > t {
                return Err(QuorumError::InvalidConfig(format!(
                    "STOP_LOSS quorum {} must not exceed {} quorum {}",
                    stop, entry, t
                )));
            }
            if t > dca {
                return Err(QuorumError::InvalidConfig(format!(
                    "{} quorum {} must not exceed DCA quorum {}",
                    entry, t, dca
                )));
            }
        }
        Ok(())
    }
}
