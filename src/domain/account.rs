use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Portfolio snapshot the policy gate validates a decision against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// Total account equity
    pub total_capital: Decimal,
    /// Uninvested cash
    pub cash: Decimal,
    /// Current notional held per instrument
    #[serde(default)]
    pub positions: BTreeMap<String, Decimal>,
    /// Peak-to-current equity drawdown as a fraction (0.08 = 8%)
    #[serde(default)]
    pub drawdown: Decimal,
    pub as_of: DateTime<Utc>,
}

impl AccountState {
    pub fn new(total_capital: Decimal, cash: Decimal) -> Self {
        Self {
            total_capital,
            cash,
            positions: BTreeMap::new(),
            drawdown: Decimal::ZERO,
            as_of: Utc::now(),
        }
    }

    pub fn with_position(mut self, instrument: &str, notional: Decimal) -> Self {
        self.positions.insert(instrument.to_string(), notional);
        self
    }

    pub fn position(&self, instrument: &str) -> Decimal {
        self.positions.get(instrument).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn open_positions(&self) -> usize {
        self.positions.values().filter(|n| !n.is_zero()).count()
    }

    /// `amount` as a fraction of total capital; None when capital is not positive
    pub fn fraction_of_capital(&self, amount: Decimal) -> Option<Decimal> {
        if self.total_capital <= Decimal::ZERO {
            None
        } else {
            Some(amount / self.total_capital)
        }
    }
}
