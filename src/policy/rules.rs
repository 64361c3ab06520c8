//! Declarative policy rules
//!
//! A rule is data plus a pure check: no clock, no I/O, no hidden state. The
//! same decision and account snapshot always produce the same result, and
//! rules can be evaluated in any order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{AccountState, Action, Decision};

/// What a rule hit means for the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// A hit rejects the decision
    Hard,
    /// A hit suspends the decision until a human answers
    RequiresApproval,
}

/// The condition a rule enforces. Fractions are of total capital.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// Single entry order size cap
    MaxOrderFraction { max_fraction: Decimal },
    /// Position size cap after the entry
    MaxPositionFraction { max_fraction: Decimal },
    /// Cash that must remain after the entry
    MinCashReserveFraction { min_fraction: Decimal },
    /// Minimum aggregate confidence; empty `actions` means every order-placing action
    MinConfidence {
        min_confidence: Decimal,
        #[serde(default)]
        actions: Vec<Action>,
    },
    /// Cap on distinct open positions when entering a new instrument
    MaxOpenPositions { max_positions: usize },
    /// No new entries while drawdown exceeds the limit
    MaxDrawdown { max_drawdown: Decimal },
    /// No new entries in these instruments
    BlockedInstruments { instruments: Vec<String> },
    /// Orders larger than `threshold` in account currency
    NotionalAbove { threshold: Decimal },
    /// Decisions whose action is in the set
    ActionIn { actions: Vec<Action> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub category: RuleCategory,
    pub constraint: Constraint,
}

impl PolicyRule {
    pub fn hard(id: &str, constraint: Constraint) -> Self {
        Self {
            id: id.to_string(),
            description: String::new(),
            category: RuleCategory::Hard,
            constraint,
        }
    }

    pub fn approval(id: &str, constraint: Constraint) -> Self {
        Self {
            id: id.to_string(),
            description: String::new(),
            category: RuleCategory::RequiresApproval,
            constraint,
        }
    }

    /// Returns a description of the hit, or None when the rule is satisfied.
    pub fn check(&self, decision: &Decision, account: &AccountState) -> Option<String> {
        let action = decision.action;
        let notional = decision.notional;

        match &self.constraint {
            Constraint::MaxOrderFraction { max_fraction } => {
                if !action.is_entry() {
                    return None;
                }
                match account.fraction_of_capital(notional) {
                    None => Some("account capital is not positive".to_string()),
                    Some(f) if f > *max_fraction => Some(format!(
                        "order {} is {}% of capital, limit {}%",
                        notional,
                        pct(f),
                        pct(*max_fraction)
                    )),
                    Some(_) => None,
                }
            }
            Constraint::MaxPositionFraction { max_fraction } => {
                if !action.is_entry() {
                    return None;
                }
                let after = account.position(&decision.instrument) + notional;
                match account.fraction_of_capital(after) {
                    None => Some("account capital is not positive".to_string()),
                    Some(f) if f > *max_fraction => Some(format!(
                        "position would be {}% of capital, limit {}%",
                        pct(f),
                        pct(*max_fraction)
                    )),
                    Some(_) => None,
                }
            }
            Constraint::MinCashReserveFraction { min_fraction } => {
                if !action.is_entry() {
                    return None;
                }
                match account.fraction_of_capital(account.cash - notional) {
                    None => Some("account capital is not positive".to_string()),
                    Some(f) if f < *min_fraction => Some(format!(
                        "cash reserve would fall to {}%, minimum {}%",
                        pct(f),
                        pct(*min_fraction)
                    )),
                    Some(_) => None,
                }
            }
            Constraint::MinConfidence {
                min_confidence,
                actions,
            } => {
                let applies = if actions.is_empty() {
                    action.places_order()
                } else {
                    actions.contains(&action)
                };
                if applies && decision.confidence < *min_confidence {
                    Some(format!(
                        "confidence {} below minimum {}",
                        decision.confidence.round_dp(4),
                        min_confidence
                    ))
                } else {
                    None
                }
            }
            Constraint::MaxOpenPositions { max_positions } => {
                let new_instrument = account.position(&decision.instrument).is_zero();
                if action.is_entry() && new_instrument && account.open_positions() >= *max_positions
                {
                    Some(format!(
                        "{} open positions, limit {}",
                        account.open_positions(),
                        max_positions
                    ))
                } else {
                    None
                }
            }
            Constraint::MaxDrawdown { max_drawdown } => {
                if action.is_entry() && account.drawdown > *max_drawdown {
                    Some(format!(
                        "drawdown {}% exceeds {}%",
                        pct(account.drawdown),
                        pct(*max_drawdown)
                    ))
                } else {
                    None
                }
            }
            Constraint::BlockedInstruments { instruments } => {
                let blocked = instruments
                    .iter()
                    .any(|i| i.eq_ignore_ascii_case(&decision.instrument));
                if action.is_entry() && blocked {
                    Some(format!("{} is on the blocked list", decision.instrument))
                } else {
                    None
                }
            }
            Constraint::NotionalAbove { threshold } => {
                if action.places_order() && notional > *threshold {
                    Some(format!("order {} above {}", notional, threshold))
                } else {
                    None
                }
            }
            Constraint::ActionIn { actions } => {
                if actions.contains(&action) {
                    Some(format!("action {} is listed", action))
                } else {
                    None
                }
            }
        }
    }
}

fn pct(fraction: Decimal) -> Decimal {
    (fraction * Decimal::ONE_HUNDRED).round_dp(2).normalize()
}
