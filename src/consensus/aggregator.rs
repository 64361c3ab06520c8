//! Weighted consensus aggregation
//!
//! `aggregate` is a pure function of the vote set, the weight snapshot and
//! the quorum table. It never reads the clock: the decision id and timestamp
//! come from the round context, so the same inputs always produce the same
//! decision, byte for byte.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::domain::{
    Action, ActionTally, Decision, QuorumTable, TieBreakRecord, TieBreakRule, VoteSet,
    WeightTable, WeightedVote,
};
use crate::error::Result;
use crate::snapshot::Versioned;

const CONFIDENCE_DP: u32 = 8;

/// Consensus configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Threshold overrides keyed by action name (`BUY`, `stop_loss`, ...)
    #[serde(default)]
    pub quorum_overrides: BTreeMap<String, Decimal>,
}

impl ConsensusConfig {
    pub fn quorum_table(&self) -> Result<QuorumTable> {
        QuorumTable::with_overrides(&self.quorum_overrides)
    }
}

#[derive(Debug, Clone)]
pub struct ConsensusAggregator {
    quorum: QuorumTable,
}

impl ConsensusAggregator {
    pub fn new(quorum: QuorumTable) -> Result<Self> {
        quorum.validate()?;
        Ok(Self { quorum })
    }

    pub fn quorum(&self) -> &QuorumTable {
        &self.quorum
    }

    pub fn aggregate(&self, votes: &VoteSet, weights: &Versioned<WeightTable>) -> Decision {
        let round = &votes.round;

        let constituents: Vec<WeightedVote> = votes
            .participating()
            .map(|(agent_id, vote)| WeightedVote {
                agent_id: agent_id.to_string(),
                action: vote.action,
                confidence: vote.confidence,
                weight: weights.weight_of(agent_id),
            })
            .collect();
        let abstained: Vec<String> = votes.abstentions().map(|v| v.agent_id.clone()).collect();

        let total_weight: Decimal = constituents.iter().map(|v| v.weight).sum();

        let mut by_action: BTreeMap<Action, (usize, Decimal)> = BTreeMap::new();
        for vote in &constituents {
            let entry = by_action.entry(vote.action).or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 += vote.weight;
        }

        let tallies: Vec<ActionTally> = by_action
            .iter()
            .map(|(action, (voters, weight))| {
                let fraction = if total_weight > Decimal::ZERO {
                    *weight / total_weight
                } else {
                    Decimal::ZERO
                };
                let threshold = self.quorum.threshold(*action);
                ActionTally {
                    action: *action,
                    voters: *voters,
                    weight: *weight,
                    fraction,
                    threshold,
                    qualified: total_weight > Decimal::ZERO && fraction >= threshold,
                }
            })
            .collect();

        let mut qualified: Vec<&ActionTally> = tallies.iter().filter(|t| t.qualified).collect();
        qualified.sort_by(|a, b| {
            b.fraction
                .cmp(&a.fraction)
                .then(a.threshold.cmp(&b.threshold))
                .then(a.action.cmp(&b.action))
        });

        let tie_break = TieBreakRecord {
            rule: tie_break_rule(&qualified),
            contenders: qualified.iter().map(|t| t.action).collect(),
        };

        let (action, no_consensus) = match qualified.first() {
            Some(winner) => (winner.action, false),
            None => (Action::Hold, true),
        };

        let confidence = if no_consensus {
            Decimal::ZERO
        } else {
            weighted_confidence(constituents.iter().filter(|v| v.action == action))
        };
        let notional = if action.places_order() {
            round.proposed_notional
        } else {
            Decimal::ZERO
        };

        debug!(
            round_id = %round.round_id,
            action = %action,
            no_consensus,
            rule = ?tie_break.rule,
            weight_generation = weights.generation,
            "aggregated round"
        );

        Decision {
            id: round.round_id,
            instrument: round.instrument.clone(),
            action,
            confidence,
            notional,
            no_consensus,
            tallies,
            constituents,
            abstained,
            tie_break,
            weight_generation: weights.generation,
            decided_at: round.as_of,
        }
    }
}

fn tie_break_rule(ranked: &[&ActionTally]) -> TieBreakRule {
    match ranked {
        [] => TieBreakRule::NoConsensus,
        [_] => TieBreakRule::SoleQualifier,
        [first, second, ..] => {
            if first.fraction != second.fraction {
                TieBreakRule::HigherFraction
            } else if first.threshold != second.threshold {
                TieBreakRule::LowerQuorum
            } else {
                TieBreakRule::CanonicalOrder
            }
        }
    }
}

/// Weight-averaged confidence of the given votes
fn weighted_confidence<'a>(votes: impl Iterator<Item = &'a WeightedVote>) -> Decimal {
    let (weighted, total) = votes.fold((Decimal::ZERO, Decimal::ZERO), |(sum, total), v| {
        (sum + v.weight * v.confidence, total + v.weight)
    });
    if total.is_zero() {
        return Decimal::ZERO;
    }
    (weighted / total).round_dp(CONFIDENCE_DP).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AbstentionReason, AgentWeight, Ballot, CastVote, RoundContext, Vote,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn cast(agent: &str, action: Action, confidence: Decimal) -> Vote {
        Vote {
            round_id: uuid::Uuid::nil(),
            agent_id: agent.to_string(),
            ballot: Ballot::Cast(CastVote {
                action,
                confidence,
                rationale: String::new(),
                factors: serde_json::Value::Null,
            }),
            recorded_at: Utc::now(),
        }
    }

    fn abstain(agent: &str) -> Vote {
        Vote {
            round_id: uuid::Uuid::nil(),
            agent_id: agent.to_string(),
            ballot: Ballot::Abstention {
                reason: AbstentionReason::Timeout,
            },
            recorded_at: Utc::now(),
        }
    }

    fn equal_weights() -> Versioned<WeightTable> {
        Versioned {
            generation: 0,
            value: WeightTable::new(dec!(1)),
        }
    }

    fn aggregator() -> ConsensusAggregator {
        ConsensusAggregator::new(QuorumTable::default()).unwrap()
    }

    #[test]
    fn test_scenario_a_buy_at_exact_quorum() {
        let set = VoteSet::new(
            RoundContext::new("AAPL", dec!(5000)),
            vec![
                cast("a1", Action::Buy, dec!(0.8)),
                cast("a2", Action::Buy, dec!(0.7)),
                cast("a3", Action::Buy, dec!(0.9)),
                cast("a4", Action::Hold, dec!(0.6)),
                cast("a5", Action::Hold, dec!(0.5)),
            ],
        );
        let decision = aggregator().aggregate(&set, &equal_weights());

        assert_eq!(decision.action, Action::Buy);
        assert!(!decision.no_consensus);
        assert_eq!(decision.confidence, dec!(0.8));
        let buy = decision.tallies.iter().find(|t| t.action == Action::Buy).unwrap();
        assert_eq!(buy.fraction, dec!(0.6));
        assert!(buy.qualified);
        assert_eq!(decision.notional, dec!(5000));
        assert_eq!(decision.id, set.round.round_id);
    }

    #[test]
    fn test_scenario_d_single_stop_loss_vote_wins() {
        let set = VoteSet::new(
            RoundContext::new("AAPL", dec!(5000)),
            vec![
                cast("a1", Action::StopLoss, dec!(0.9)),
                cast("a2", Action::Hold, dec!(0.5)),
                cast("a3", Action::Buy, dec!(0.6)),
                cast("a4", Action::Buy, dec!(0.6)),
                cast("a5", Action::Sell, dec!(0.6)),
            ],
        );
        let decision = aggregator().aggregate(&set, &equal_weights());
        assert_eq!(decision.action, Action::StopLoss);
        assert_eq!(decision.tie_break.rule, TieBreakRule::SoleQualifier);
        assert_eq!(decision.confidence, dec!(0.9));
    }

    #[test]
    fn test_nothing_qualifies_defaults_to_hold() {
        let set = VoteSet::new(
            RoundContext::new("AAPL", dec!(5000)),
            vec![
                cast("a1", Action::Buy, dec!(0.9)),
                cast("a2", Action::Buy, dec!(0.9)),
                cast("a3", Action::Increase, dec!(0.9)),
                cast("a4", Action::Dca, dec!(0.9)),
                cast("a5", Action::Maintain, dec!(0.9)),
            ],
        );
        let decision = aggregator().aggregate(&set, &equal_weights());
        assert_eq!(decision.action, Action::Hold);
        assert!(decision.no_consensus);
        assert_eq!(decision.tie_break.rule, TieBreakRule::NoConsensus);
        assert_eq!(decision.notional, Decimal::ZERO);
    }

    #[test]
    fn test_equal_fraction_prefers_lower_quorum() {
        // 0.5 / 0.5: REDUCE (0.40) and HOLD (0.50) both qualify
        let set = VoteSet::new(
            RoundContext::new("AAPL", dec!(5000)),
            vec![
                cast("a1", Action::Hold, dec!(0.6)),
                cast("a2", Action::Reduce, dec!(0.7)),
            ],
        );
        let decision = aggregator().aggregate(&set, &equal_weights());
        assert_eq!(decision.action, Action::Reduce);
        assert_eq!(decision.tie_break.rule, TieBreakRule::LowerQuorum);
        assert_eq!(decision.tie_break.contenders, vec![Action::Reduce, Action::Hold]);
    }

    #[test]
    fn test_higher_fraction_beats_lower_quorum() {
        let set = VoteSet::new(
            RoundContext::new("AAPL", dec!(5000)),
            vec![
                cast("a1", Action::StopLoss, dec!(0.6)),
                cast("a2", Action::Sell, dec!(0.7)),
                cast("a3", Action::Sell, dec!(0.7)),
                cast("a4", Action::Sell, dec!(0.7)),
                cast("a5", Action::Sell, dec!(0.7)),
            ],
        );
        let decision = aggregator().aggregate(&set, &equal_weights());
        assert_eq!(decision.action, Action::Sell);
        assert_eq!(decision.tie_break.rule, TieBreakRule::HigherFraction);
    }

    #[test]
    fn test_weights_shift_the_outcome() {
        let set = VoteSet::new(
            RoundContext::new("AAPL", dec!(5000)),
            vec![
                cast("strong", Action::Buy, dec!(0.8)),
                cast("weak-1", Action::Hold, dec!(0.5)),
                cast("weak-2", Action::Hold, dec!(0.5)),
            ],
        );
        let now = Utc::now();
        let table = WeightTable::from_weights(
            dec!(1),
            vec![
                AgentWeight::initial("strong", dec!(1.5), now),
                AgentWeight::initial("weak-1", dec!(0.5), now),
                AgentWeight::initial("weak-2", dec!(0.5), now),
            ],
        );
        let decision = aggregator().aggregate(
            &set,
            &Versioned {
                generation: 7,
                value: table,
            },
        );
        // 1.5 / 2.5 = 0.6
        assert_eq!(decision.action, Action::Buy);
        assert_eq!(decision.weight_generation, 7);
    }

    #[test]
    fn test_abstentions_do_not_count_toward_total() {
        let set = VoteSet::new(
            RoundContext::new("AAPL", dec!(5000)),
            vec![
                cast("a1", Action::Buy, dec!(0.8)),
                cast("a2", Action::Buy, dec!(0.8)),
                abstain("a3"),
                abstain("a4"),
                cast("a5", Action::Hold, dec!(0.5)),
            ],
        );
        let decision = aggregator().aggregate(&set, &equal_weights());
        assert_eq!(decision.action, Action::Buy);
        assert_eq!(decision.abstained, vec!["a3".to_string(), "a4".to_string()]);
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let ctx = RoundContext::new("AAPL", dec!(5000));
        let votes = vec![
            cast("a3", Action::Buy, dec!(0.9)),
            cast("a1", Action::Buy, dec!(0.8)),
            cast("a5", Action::Hold, dec!(0.5)),
            cast("a2", Action::Buy, dec!(0.7)),
            cast("a4", Action::Hold, dec!(0.6)),
        ];
        let mut shuffled = votes.clone();
        shuffled.reverse();

        let agg = aggregator();
        let first = agg.aggregate(&VoteSet::new(ctx.clone(), votes), &equal_weights());
        let second = agg.aggregate(&VoteSet::new(ctx, shuffled), &equal_weights());
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }
}
