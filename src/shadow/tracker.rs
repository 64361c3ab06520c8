//! Counterfactual tracker
//!
//! Every rejected decision gets a shadow position priced at rejection time.
//! A periodic sweep matures positions past their horizon:
//! - return < 0 → defensive win (the rejection avoided a loss)
//! - return > materiality → missed opportunity
//! - otherwise → neutral
//!
//! A position whose price cannot be fetched within the retry bound is
//! cancelled and marked unresolved. Positions are never deleted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{MarketData, PriceTime};
use crate::domain::{
    Decision, Direction, RuleViolation, ShadowOutcome, ShadowPosition, ShadowStatus,
};
use crate::error::{QuorumError, Result};
use crate::persistence::GovernanceStore;
use crate::scheduler::retry::{retry_transient, BackoffPolicy};

const RETURN_DP: u32 = 10;

/// Counterfactual tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowConfig {
    /// Periods from rejection to maturity
    #[serde(default = "default_horizon_periods")]
    pub horizon_periods: u32,
    /// Length of one period
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// Returns above this count as a missed opportunity
    #[serde(default = "default_materiality_threshold")]
    pub materiality_threshold: Decimal,
    /// Sweeps that may fail to price a due position before it is cancelled
    #[serde(default = "default_max_resolution_attempts")]
    pub max_resolution_attempts: u32,
    /// Retry of a single price lookup
    #[serde(default)]
    pub price_retry: BackoffPolicy,
}

fn default_horizon_periods() -> u32 {
    7
}
fn default_period_secs() -> u64 {
    86_400
}
fn default_materiality_threshold() -> Decimal {
    dec!(0.02)
}
fn default_max_resolution_attempts() -> u32 {
    3
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            horizon_periods: default_horizon_periods(),
            period_secs: default_period_secs(),
            materiality_threshold: default_materiality_threshold(),
            max_resolution_attempts: default_max_resolution_attempts(),
            price_retry: BackoffPolicy::default(),
        }
    }
}

impl ShadowConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.horizon_periods == 0 {
            errors.push("shadow.horizon_periods must be at least 1".to_string());
        }
        if self.period_secs == 0 {
            errors.push("shadow.period_secs must be positive".to_string());
        }
        if self.materiality_threshold < Decimal::ZERO {
            errors.push("shadow.materiality_threshold must not be negative".to_string());
        }
        if self.max_resolution_attempts == 0 {
            errors.push("shadow.max_resolution_attempts must be at least 1".to_string());
        }
        errors.extend(self.price_retry.validate("shadow.price_retry"));
        errors
    }

    pub fn horizon(&self) -> chrono::Duration {
        chrono::Duration::seconds((self.period_secs * self.horizon_periods as u64) as i64)
    }
}

/// Result of one maturity sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub due: usize,
    pub matured: usize,
    /// Cancelled as unresolved this sweep
    pub cancelled: usize,
    /// Price unavailable; retried next sweep
    pub deferred: usize,
}

/// Return in the direction of the rejected action
pub fn directional_return(direction: Direction, entry: Decimal, exit: Decimal) -> Decimal {
    if entry <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let raw = match direction {
        Direction::Long => (exit - entry) / entry,
        Direction::Short => (entry - exit) / entry,
        Direction::Flat => Decimal::ZERO,
    };
    raw.round_dp(RETURN_DP)
}

pub fn classify(realized_return: Decimal, materiality: Decimal) -> ShadowOutcome {
    if realized_return < Decimal::ZERO {
        ShadowOutcome::DefensiveWin
    } else if realized_return > materiality {
        ShadowOutcome::MissedOpportunity
    } else {
        ShadowOutcome::Neutral
    }
}

pub struct CounterfactualTracker {
    store: Arc<dyn GovernanceStore>,
    market: Arc<dyn MarketData>,
    config: ShadowConfig,
}

impl CounterfactualTracker {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        market: Arc<dyn MarketData>,
        config: ShadowConfig,
    ) -> Self {
        Self {
            store,
            market,
            config,
        }
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    async fn price(&self, instrument: &str, at: DateTime<Utc>) -> Result<Decimal> {
        let market = &self.market;
        retry_transient(&self.config.price_retry, "shadow price", move || async move {
            market
                .price_at(instrument, PriceTime::At(at))
                .await
                .map_err(QuorumError::from)
        })
        .await
    }

    /// Open the shadow position for a rejected decision.
    ///
    /// The entry is priced at the decision time. If no price can be had the
    /// position is still recorded, already cancelled as unresolved.
    pub async fn open(
        &self,
        decision: &Decision,
        violations: &[RuleViolation],
    ) -> Result<ShadowPosition> {
        let opened_at = decision.decided_at;
        let mut position = ShadowPosition {
            id: Uuid::new_v4(),
            decision_id: decision.id,
            instrument: decision.instrument.clone(),
            action: decision.action,
            notional: decision.notional,
            rejected_by: violations.iter().map(|v| v.rule_id.clone()).collect(),
            entry_price: None,
            opened_at,
            horizon_periods: self.config.horizon_periods,
            matures_at: opened_at + self.config.horizon(),
            status: ShadowStatus::Open,
            resolution_attempts: 0,
            exit_price: None,
            realized_return: None,
            outcome: None,
            resolved_at: None,
            note: None,
        };

        match self.price(&decision.instrument, opened_at).await {
            Ok(price) => {
                position.entry_price = Some(price);
                info!(
                    shadow_id = %position.id,
                    decision_id = %decision.id,
                    instrument = %decision.instrument,
                    action = %decision.action,
                    entry_price = %price,
                    matures_at = %position.matures_at,
                    "shadow position opened"
                );
            }
            Err(e) if e.is_transient() => {
                position.status = ShadowStatus::Cancelled;
                position.outcome = Some(ShadowOutcome::Unresolved);
                position.resolved_at = Some(Utc::now());
                position.note = Some(format!("entry price unavailable: {}", e));
                warn!(
                    shadow_id = %position.id,
                    decision_id = %decision.id,
                    error = %e,
                    "shadow position cancelled at open: unresolved"
                );
            }
            Err(e) => return Err(e),
        }

        self.store.insert_shadow(&position).await?;
        Ok(position)
    }

    /// Mature every OPEN position whose horizon has passed at `now`.
    ///
    /// Must run under the sweep job lease.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let due = self.store.due_shadows(now).await?;
        let mut report = SweepReport {
            due: due.len(),
            ..Default::default()
        };

        for position in due {
            match self.resolve(position, now).await {
                Ok(ShadowStatus::Matured) => report.matured += 1,
                Ok(ShadowStatus::Cancelled) => report.cancelled += 1,
                Ok(ShadowStatus::Open) => report.deferred += 1,
                Err(e @ QuorumError::InvalidStateTransition { .. }) => {
                    warn!(error = %e, "shadow position already resolved elsewhere");
                }
                Err(e) => return Err(e),
            }
        }

        if report.due > 0 {
            info!(
                due = report.due,
                matured = report.matured,
                cancelled = report.cancelled,
                deferred = report.deferred,
                "maturity sweep complete"
            );
        } else {
            debug!("maturity sweep: nothing due");
        }
        Ok(report)
    }

    async fn resolve(&self, mut position: ShadowPosition, now: DateTime<Utc>) -> Result<ShadowStatus> {
        let Some(entry) = position.entry_price else {
            // Only cancelled positions lack an entry; an open one without is corrupt
            error!(shadow_id = %position.id, "open shadow position has no entry price");
            position.status = ShadowStatus::Cancelled;
            position.outcome = Some(ShadowOutcome::Unresolved);
            position.resolved_at = Some(now);
            position.note = Some("missing entry price".to_string());
            self.store.update_shadow(&position).await?;
            return Ok(ShadowStatus::Cancelled);
        };

        match self.price(&position.instrument, now).await {
            Ok(exit) => {
                let realized = directional_return(position.direction(), entry, exit);
                let outcome = classify(realized, self.config.materiality_threshold);
                position.status = ShadowStatus::Matured;
                position.exit_price = Some(exit);
                position.realized_return = Some(realized);
                position.outcome = Some(outcome);
                position.resolved_at = Some(now);
                self.store.update_shadow(&position).await?;

                info!(
                    shadow_id = %position.id,
                    decision_id = %position.decision_id,
                    instrument = %position.instrument,
                    realized_return = %realized,
                    ?outcome,
                    "shadow position matured"
                );
                Ok(ShadowStatus::Matured)
            }
            Err(e) if e.is_transient() => {
                position.resolution_attempts += 1;
                if position.resolution_attempts >= self.config.max_resolution_attempts {
                    position.status = ShadowStatus::Cancelled;
                    position.outcome = Some(ShadowOutcome::Unresolved);
                    position.resolved_at = Some(now);
                    position.note = Some(format!(
                        "exit price unavailable after {} attempts: {}",
                        position.resolution_attempts, e
                    ));
                    warn!(
                        shadow_id = %position.id,
                        attempts = position.resolution_attempts,
                        "shadow position cancelled: unresolved"
                    );
                } else {
                    warn!(
                        shadow_id = %position.id,
                        attempts = position.resolution_attempts,
                        error = %e,
                        "exit price unavailable; will retry next sweep"
                    );
                }
                self.store.update_shadow(&position).await?;
                Ok(position.status)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockMarketData, PriceUnavailable};
    use crate::domain::{Action, TieBreakRecord, TieBreakRule};
    use crate::persistence::InMemoryStore;
    use chrono::Duration;

    fn decision(action: Action, at: DateTime<Utc>) -> Decision {
        Decision {
            id: Uuid::new_v4(),
            instrument: "AAPL".into(),
            action,
            confidence: dec!(0.8),
            notional: dec!(15000),
            no_consensus: false,
            tallies: vec![],
            constituents: vec![],
            abstained: vec![],
            tie_break: TieBreakRecord {
                rule: TieBreakRule::SoleQualifier,
                contenders: vec![action],
            },
            weight_generation: 0,
            decided_at: at,
        }
    }

    fn violations() -> Vec<RuleViolation> {
        vec![RuleViolation {
            rule_id: "max-order-10pct".into(),
            detail: "too big".into(),
        }]
    }

    fn fast_config() -> ShadowConfig {
        ShadowConfig {
            price_retry: BackoffPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_classification_boundaries() {
        let m = dec!(0.02);
        assert_eq!(classify(dec!(-0.0001), m), ShadowOutcome::DefensiveWin);
        assert_eq!(classify(Decimal::ZERO, m), ShadowOutcome::Neutral);
        assert_eq!(classify(dec!(0.02), m), ShadowOutcome::Neutral);
        assert_eq!(classify(dec!(0.0201), m), ShadowOutcome::MissedOpportunity);
    }

    #[test]
    fn test_directional_return() {
        assert_eq!(directional_return(Direction::Long, dec!(100), dec!(96)), dec!(-0.04));
        assert_eq!(directional_return(Direction::Short, dec!(100), dec!(96)), dec!(0.04));
        assert_eq!(directional_return(Direction::Flat, dec!(100), dec!(96)), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_open_uses_seven_period_horizon() {
        let mut market = MockMarketData::new();
        market.expect_price_at().returning(|_, _| Ok(dec!(100)));
        let store = Arc::new(InMemoryStore::new());
        let tracker = CounterfactualTracker::new(store.clone(), Arc::new(market), fast_config());

        let at = Utc::now();
        let position = tracker
            .open(&decision(Action::Buy, at), &violations())
            .await
            .unwrap();
        assert_eq!(position.status, ShadowStatus::Open);
        assert_eq!(position.entry_price, Some(dec!(100)));
        assert_eq!(position.matures_at, at + Duration::days(7));
        assert_eq!(position.rejected_by, vec!["max-order-10pct".to_string()]);
    }

    #[tokio::test]
    async fn test_open_without_price_is_recorded_unresolved() {
        let mut market = MockMarketData::new();
        market.expect_price_at().times(2).returning(|i, _| {
            Err(PriceUnavailable {
                instrument: i.to_string(),
                reason: "halted".into(),
            })
        });
        let store = Arc::new(InMemoryStore::new());
        let tracker = CounterfactualTracker::new(store.clone(), Arc::new(market), fast_config());

        let d = decision(Action::Buy, Utc::now());
        let position = tracker.open(&d, &violations()).await.unwrap();
        assert_eq!(position.status, ShadowStatus::Cancelled);
        assert_eq!(position.outcome, Some(ShadowOutcome::Unresolved));
        assert!(store.shadow_for_decision(d.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_ignores_positions_before_horizon() {
        let mut market = MockMarketData::new();
        market.expect_price_at().returning(|_, _| Ok(dec!(100)));
        let store = Arc::new(InMemoryStore::new());
        let tracker = CounterfactualTracker::new(store.clone(), Arc::new(market), fast_config());

        let at = Utc::now();
        tracker.open(&decision(Action::Buy, at), &violations()).await.unwrap();
        let report = tracker.sweep(at + Duration::days(6)).await.unwrap();
        assert_eq!(report.due, 0);
    }

    #[tokio::test]
    async fn test_unpriceable_position_cancelled_after_bound() {
        let store = Arc::new(InMemoryStore::new());
        let at = Utc::now();

        let mut open_market = MockMarketData::new();
        open_market.expect_price_at().returning(|_, _| Ok(dec!(100)));
        let opener = CounterfactualTracker::new(store.clone(), Arc::new(open_market), fast_config());
        let position = opener.open(&decision(Action::Buy, at), &violations()).await.unwrap();

        let mut dark = MockMarketData::new();
        dark.expect_price_at().returning(|i, _| {
            Err(PriceUnavailable {
                instrument: i.to_string(),
                reason: "feed down".into(),
            })
        });
        let sweeper = CounterfactualTracker::new(store.clone(), Arc::new(dark), fast_config());
        let due = at + Duration::days(7);

        assert_eq!(sweeper.sweep(due).await.unwrap().deferred, 1);
        assert_eq!(sweeper.sweep(due).await.unwrap().deferred, 1);
        assert_eq!(sweeper.sweep(due).await.unwrap().cancelled, 1);
        assert_eq!(sweeper.sweep(due).await.unwrap().due, 0);

        let stored = store.shadow(position.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ShadowStatus::Cancelled);
        assert_eq!(stored.outcome, Some(ShadowOutcome::Unresolved));
        assert_eq!(stored.resolution_attempts, 3);
    }
}
