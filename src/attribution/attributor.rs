//! Performance attribution
//!
//! Joins realized outcomes back to the votes on the winning side of the
//! decision that produced them. Purely observational: no weighting happens
//! here, so the records stay auditable whatever weighting policy is live.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{Decision, Direction, OutcomeSource, PerformanceRecord, TimeWindow};
use crate::error::Result;
use crate::persistence::GovernanceStore;

pub struct PerformanceAttributor {
    store: Arc<dyn GovernanceStore>,
}

impl PerformanceAttributor {
    pub fn new(store: Arc<dyn GovernanceStore>) -> Self {
        Self { store }
    }

    /// Attribute every outcome realized inside `window`.
    ///
    /// Safe to re-run: records are keyed by (decision, agent) and appended once.
    /// Returns all records for the window, newly written or not.
    pub async fn attribute(&self, window: TimeWindow) -> Result<Vec<PerformanceRecord>> {
        let mut records = Vec::new();

        for shadow in self.store.matured_shadows_between(window).await? {
            let (Some(realized), Some(resolved_at)) = (shadow.realized_return, shadow.resolved_at)
            else {
                warn!(shadow_id = %shadow.id, "matured shadow position without a realized return");
                continue;
            };
            match self.store.decision(shadow.decision_id).await? {
                Some(decision) => records.extend(records_for(
                    &decision,
                    OutcomeSource::Shadow,
                    realized,
                    resolved_at,
                )),
                None => warn!(
                    shadow_id = %shadow.id,
                    decision_id = %shadow.decision_id,
                    "shadow position references an unknown decision"
                ),
            }
        }

        for settlement in self.store.settlements_between(window).await? {
            match self.store.decision(settlement.decision_id).await? {
                Some(decision) => records.extend(records_for(
                    &decision,
                    OutcomeSource::Executed,
                    settlement.realized_return,
                    settlement.settled_at,
                )),
                None => warn!(
                    decision_id = %settlement.decision_id,
                    "settlement references an unknown decision"
                ),
            }
        }

        records.sort_by(|a, b| {
            a.realized_at
                .cmp(&b.realized_at)
                .then(a.decision_id.cmp(&b.decision_id))
                .then(a.agent_id.cmp(&b.agent_id))
        });

        let inserted = self.store.append_performance(&records).await?;
        info!(
            window = %window,
            records = records.len(),
            new = inserted,
            "performance attributed"
        );
        Ok(records)
    }
}

/// One record per supporting vote.
///
/// `signed_return` is already expressed in the decision's direction, so a
/// positive value means the supporters called it right. Flat decisions have
/// no directional outcome and produce no records.
pub fn records_for(
    decision: &Decision,
    source: OutcomeSource,
    signed_return: Decimal,
    realized_at: DateTime<Utc>,
) -> Vec<PerformanceRecord> {
    if decision.action.direction() == Direction::Flat {
        debug!(decision_id = %decision.id, "flat decision; nothing to attribute");
        return Vec::new();
    }

    decision
        .supporters()
        .map(|vote| PerformanceRecord {
            decision_id: decision.id,
            agent_id: vote.agent_id.clone(),
            source,
            voted_action: vote.action,
            direction_match: signed_return > Decimal::ZERO,
            signed_return,
            stated_confidence: vote.confidence,
            realized_at,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, Settlement, TieBreakRecord, TieBreakRule, WeightedVote};
    use crate::persistence::InMemoryStore;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn decision(action: Action) -> Decision {
        let vote = |agent: &str, action: Action, confidence: Decimal| WeightedVote {
            agent_id: agent.to_string(),
            action,
            confidence,
            weight: dec!(1),
        };
        Decision {
            id: Uuid::new_v4(),
            instrument: "MSFT".into(),
            action,
            confidence: dec!(0.8),
            notional: dec!(1000),
            no_consensus: false,
            tallies: vec![],
            constituents: vec![
                vote("a1", action, dec!(0.8)),
                vote("a2", action, dec!(0.7)),
                vote("a3", Action::Hold, dec!(0.5)),
            ],
            abstained: vec![],
            tie_break: TieBreakRecord {
                rule: TieBreakRule::SoleQualifier,
                contenders: vec![action],
            },
            weight_generation: 0,
            decided_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_settlement_attributed_to_supporters_only() {
        let store = Arc::new(InMemoryStore::new());
        let d = decision(Action::Buy);
        store.append_decision(&d).await.unwrap();
        let now = Utc::now();
        store
            .record_settlement(&Settlement {
                decision_id: d.id,
                realized_return: dec!(0.05),
                settled_at: now,
            })
            .await
            .unwrap();

        let attributor = PerformanceAttributor::new(store.clone());
        let window = TimeWindow::trailing(now + Duration::seconds(1), Duration::days(1));
        let records = attributor.attribute(window).await.unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.direction_match));
        assert!(records.iter().all(|r| r.source == OutcomeSource::Executed));
        assert_eq!(records[0].agent_id, "a1");
        assert_eq!(records[0].stated_confidence, dec!(0.8));
    }

    #[tokio::test]
    async fn test_reattribution_does_not_duplicate() {
        let store = Arc::new(InMemoryStore::new());
        let d = decision(Action::Sell);
        store.append_decision(&d).await.unwrap();
        let now = Utc::now();
        store
            .record_settlement(&Settlement {
                decision_id: d.id,
                realized_return: dec!(-0.01),
                settled_at: now,
            })
            .await
            .unwrap();

        let attributor = PerformanceAttributor::new(store.clone());
        let window = TimeWindow::trailing(now + Duration::seconds(1), Duration::days(1));
        let first = attributor.attribute(window).await.unwrap();
        let second = attributor.attribute(window).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.performance_between(window).await.unwrap().len(), 2);
    }

    #[test]
    fn test_flat_decisions_produce_no_records() {
        let d = decision(Action::Hold);
        assert!(records_for(&d, OutcomeSource::Shadow, dec!(0.1), Utc::now()).is_empty());
    }
}
