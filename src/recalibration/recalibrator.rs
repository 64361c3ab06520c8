//! Weight recalibration
//!
//! Per agent, over one window of performance records:
//! 1. below `min_samples` the weight is left alone (`InsufficientData`)
//! 2. accuracy picks a base multiplier from the tier table
//! 3. the confidence gap (mean confidence - accuracy) applies a penalty or bonus
//! 4. the result is floored strictly above zero
//!
//! The output depends only on the window's records, so re-running an
//! unchanged window yields the same weights and writes nothing new.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::weight_book::WeightBook;
use crate::adapters::{FlagKind, Notifier};
use crate::domain::{AgentWeight, PerformanceRecord, TimeWindow, WeightStats};
use crate::error::{QuorumError, Result};
use crate::persistence::GovernanceStore;

const STAT_DP: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccuracyTier {
    /// Inclusive lower bound
    pub min_accuracy: Decimal,
    pub multiplier: Decimal,
}

fn tier(min_accuracy: Decimal, multiplier: Decimal) -> AccuracyTier {
    AccuracyTier {
        min_accuracy,
        multiplier,
    }
}

/// Weight recalibration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalibrationConfig {
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Highest bound first
    #[serde(default = "default_tiers")]
    pub tiers: Vec<AccuracyTier>,
    /// Multiplier for accuracy under every tier
    #[serde(default = "default_floor_tier_multiplier")]
    pub floor_tier_multiplier: Decimal,
    /// Accuracy of a coin flip
    #[serde(default = "default_chance_accuracy")]
    pub chance_accuracy: Decimal,
    #[serde(default = "default_overconfidence_gap")]
    pub overconfidence_gap: Decimal,
    #[serde(default = "default_overconfidence_penalty")]
    pub overconfidence_penalty: Decimal,
    /// Magnitude of a negative gap that earns the bonus
    #[serde(default = "default_underconfidence_gap")]
    pub underconfidence_gap: Decimal,
    #[serde(default = "default_underconfidence_bonus")]
    pub underconfidence_bonus: Decimal,
    /// Smallest weight recalibration can produce; must be above zero
    #[serde(default = "default_weight_floor")]
    pub weight_floor: Decimal,
    #[serde(default = "default_low_performer_accuracy")]
    pub low_performer_accuracy: Decimal,
    #[serde(default = "default_overconfidence_flag_gap")]
    pub overconfidence_flag_gap: Decimal,
}

fn default_min_samples() -> usize {
    10
}
fn default_tiers() -> Vec<AccuracyTier> {
    vec![
        tier(dec!(0.70), dec!(1.50)),
        tier(dec!(0.60), dec!(1.25)),
        tier(dec!(0.52), dec!(1.05)),
        tier(dec!(0.40), dec!(0.75)),
    ]
}
fn default_floor_tier_multiplier() -> Decimal {
    dec!(0.50)
}
fn default_chance_accuracy() -> Decimal {
    dec!(0.50)
}
fn default_overconfidence_gap() -> Decimal {
    dec!(0.15)
}
fn default_overconfidence_penalty() -> Decimal {
    dec!(0.80)
}
fn default_underconfidence_gap() -> Decimal {
    dec!(0.15)
}
fn default_underconfidence_bonus() -> Decimal {
    dec!(1.05)
}
fn default_weight_floor() -> Decimal {
    dec!(0.10)
}
fn default_low_performer_accuracy() -> Decimal {
    dec!(0.45)
}
fn default_overconfidence_flag_gap() -> Decimal {
    dec!(0.20)
}

impl Default for RecalibrationConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            tiers: default_tiers(),
            floor_tier_multiplier: default_floor_tier_multiplier(),
            chance_accuracy: default_chance_accuracy(),
            overconfidence_gap: default_overconfidence_gap(),
            overconfidence_penalty: default_overconfidence_penalty(),
            underconfidence_gap: default_underconfidence_gap(),
            underconfidence_bonus: default_underconfidence_bonus(),
            weight_floor: default_weight_floor(),
            low_performer_accuracy: default_low_performer_accuracy(),
            overconfidence_flag_gap: default_overconfidence_flag_gap(),
        }
    }
}

impl RecalibrationConfig {
    /// Structural checks; magnitudes are free to tune.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.min_samples == 0 {
            errors.push("recalibration.min_samples must be at least 1".to_string());
        }
        if self.weight_floor <= Decimal::ZERO {
            errors.push("recalibration.weight_floor must be above zero".to_string());
        }
        if self.tiers.is_empty() {
            errors.push("recalibration.tiers must not be empty".to_string());
        }
        for pair in self.tiers.windows(2) {
            if pair[0].min_accuracy <= pair[1].min_accuracy {
                errors.push("recalibration.tiers must be ordered by descending min_accuracy".to_string());
            }
            if pair[0].multiplier < pair[1].multiplier {
                errors.push("recalibration.tiers multipliers must not rise as accuracy falls".to_string());
            }
        }
        for t in &self.tiers {
            if t.multiplier <= Decimal::ZERO {
                errors.push(format!(
                    "recalibration tier {} multiplier must be above zero",
                    t.min_accuracy
                ));
            }
            if t.min_accuracy <= self.chance_accuracy && t.multiplier >= Decimal::ONE {
                errors.push(format!(
                    "recalibration tier {} is at or below chance and must shrink the weight",
                    t.min_accuracy
                ));
            }
        }
        if let Some(first) = self.tiers.first() {
            if first.multiplier <= Decimal::ONE {
                errors.push("recalibration top tier must raise the weight".to_string());
            }
        }
        if let Some(last) = self.tiers.last() {
            if self.floor_tier_multiplier > last.multiplier {
                errors.push(
                    "recalibration.floor_tier_multiplier must not exceed the lowest tier".to_string(),
                );
            }
        }
        if self.floor_tier_multiplier <= Decimal::ZERO || self.floor_tier_multiplier >= Decimal::ONE {
            errors.push("recalibration.floor_tier_multiplier must be in (0, 1)".to_string());
        }
        if self.overconfidence_penalty <= Decimal::ZERO || self.overconfidence_penalty > Decimal::ONE {
            errors.push("recalibration.overconfidence_penalty must be in (0, 1]".to_string());
        }
        if self.underconfidence_bonus < Decimal::ONE {
            errors.push("recalibration.underconfidence_bonus must be at least 1".to_string());
        }
        errors
    }

    /// Base multiplier for an accuracy
    pub fn tier_multiplier(&self, accuracy: Decimal) -> Decimal {
        self.tiers
            .iter()
            .find(|t| accuracy >= t.min_accuracy)
            .map(|t| t.multiplier)
            .unwrap_or(self.floor_tier_multiplier)
    }

    /// Correction factor for a confidence gap, applied after the tier
    pub fn gap_correction(&self, gap: Decimal) -> Decimal {
        if gap > self.overconfidence_gap {
            self.overconfidence_penalty
        } else if gap < -self.underconfidence_gap {
            self.underconfidence_bonus
        } else {
            Decimal::ONE
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WeightOutcome {
    Computed { weight: AgentWeight, changed: bool },
    /// Weight left as it was; not the same as a computed neutral weight
    InsufficientData { samples: usize, required: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentFlag {
    pub agent_id: String,
    pub kind: FlagKind,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecalibrationReport {
    pub window: TimeWindow,
    pub outcomes: BTreeMap<String, WeightOutcome>,
    pub flags: Vec<AgentFlag>,
    /// Weight table generation after this run
    pub generation: u64,
}

impl RecalibrationReport {
    /// Computed weights keyed by agent
    pub fn weights(&self) -> BTreeMap<String, AgentWeight> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| match outcome {
                WeightOutcome::Computed { weight, .. } => Some((id.clone(), weight.clone())),
                WeightOutcome::InsufficientData { .. } => None,
            })
            .collect()
    }
}

/// Window statistics for one agent
pub fn window_stats(window: TimeWindow, records: &[&PerformanceRecord]) -> WeightStats {
    let samples = records.len();
    let hits = records.iter().filter(|r| r.direction_match).count();
    let (accuracy, mean_confidence) = if samples == 0 {
        (Decimal::ZERO, Decimal::ZERO)
    } else {
        let n = Decimal::from(samples);
        let confidence: Decimal = records.iter().map(|r| r.stated_confidence).sum();
        (
            (Decimal::from(hits) / n).round_dp(STAT_DP),
            (confidence / n).round_dp(STAT_DP),
        )
    };
    WeightStats {
        window,
        samples,
        hits,
        accuracy,
        mean_confidence,
        confidence_gap: mean_confidence - accuracy,
    }
}

pub struct Recalibrator {
    store: Arc<dyn GovernanceStore>,
    book: Arc<WeightBook>,
    notifier: Arc<dyn Notifier>,
    config: RecalibrationConfig,
}

impl Recalibrator {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        book: Arc<WeightBook>,
        notifier: Arc<dyn Notifier>,
        config: RecalibrationConfig,
    ) -> Result<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(QuorumError::InvalidConfig(problems.join("; ")));
        }
        Ok(Self {
            store,
            book,
            notifier,
            config,
        })
    }

    pub fn config(&self) -> &RecalibrationConfig {
        &self.config
    }

    /// Weight for the given statistics
    pub fn compute_weight(&self, default_weight: Decimal, stats: &WeightStats) -> Decimal {
        let base = self.config.tier_multiplier(stats.accuracy);
        let corrected = base * self.config.gap_correction(stats.confidence_gap);
        (default_weight * corrected)
            .round_dp(STAT_DP)
            .max(self.config.weight_floor)
    }

    fn flags_for(&self, agent_id: &str, stats: &WeightStats) -> Vec<AgentFlag> {
        let mut flags = Vec::new();
        if stats.accuracy < self.config.low_performer_accuracy {
            flags.push(AgentFlag {
                agent_id: agent_id.to_string(),
                kind: FlagKind::LowPerformer,
                details: format!(
                    "accuracy {} over {} samples below {} in {}",
                    stats.accuracy, stats.samples, self.config.low_performer_accuracy, stats.window
                ),
            });
        }
        if stats.confidence_gap > self.config.overconfidence_flag_gap {
            flags.push(AgentFlag {
                agent_id: agent_id.to_string(),
                kind: FlagKind::Overconfident,
                details: format!(
                    "mean confidence {} exceeds accuracy {} by {} in {}",
                    stats.mean_confidence, stats.accuracy, stats.confidence_gap, stats.window
                ),
            });
        }
        flags
    }

    /// Recompute weights from the window's performance records.
    ///
    /// Must run under the recalibration job lease.
    pub async fn recalibrate(&self, window: TimeWindow) -> Result<RecalibrationReport> {
        let records = self.store.performance_between(window).await?;
        let table = self.book.snapshot();

        let mut by_agent: BTreeMap<String, Vec<&PerformanceRecord>> = BTreeMap::new();
        for agent in table.iter() {
            by_agent.entry(agent.agent_id.clone()).or_default();
        }
        for record in &records {
            by_agent.entry(record.agent_id.clone()).or_default().push(record);
        }

        let mut outcomes = BTreeMap::new();
        let mut flags = Vec::new();
        let mut changed = Vec::new();

        for (agent_id, agent_records) in by_agent {
            let samples = agent_records.len();
            if samples < self.config.min_samples {
                debug!(agent_id = %agent_id, samples, "insufficient data; weight unchanged");
                outcomes.insert(
                    agent_id,
                    WeightOutcome::InsufficientData {
                        samples,
                        required: self.config.min_samples,
                    },
                );
                continue;
            }

            let stats = window_stats(window, &agent_records);
            let weight = AgentWeight {
                agent_id: agent_id.clone(),
                weight: self.compute_weight(table.default_weight(), &stats),
                stats: Some(stats.clone()),
                updated_at: window.end,
            };

            let is_new = table.get(&agent_id) != Some(&weight);
            if is_new {
                self.store.save_weight(&weight).await?;
                flags.extend(self.flags_for(&agent_id, &stats));
                changed.push(weight.clone());
            } else {
                // Same window seen before; its flags were already raised
                debug!(agent_id = %agent_id, "weight already current for this window");
            }

            outcomes.insert(
                agent_id,
                WeightOutcome::Computed {
                    weight,
                    changed: is_new,
                },
            );
        }

        let generation = if changed.is_empty() {
            table.generation
        } else {
            self.book.publish(changed.clone())
        };

        for weight in &changed {
            info!(
                agent_id = %weight.agent_id,
                weight = %weight.weight,
                generation,
                "agent weight recalibrated"
            );
        }

        // Notification is fire-and-forget and happens after the writes
        for flag in &flags {
            warn!(agent_id = %flag.agent_id, flag = %flag.kind, details = %flag.details, "agent flagged");
            let notifier = Arc::clone(&self.notifier);
            let flag = flag.clone();
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(&flag.agent_id, flag.kind, &flag.details).await {
                    warn!(agent_id = %flag.agent_id, error = %e, "flag notification failed");
                }
            });
        }

        info!(
            window = %window,
            records = records.len(),
            updated = changed.len(),
            flagged = flags.len(),
            generation,
            "recalibration complete"
        );

        Ok(RecalibrationReport {
            window,
            outcomes,
            flags,
            generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LoggingNotifier;
    use crate::persistence::InMemoryStore;
    use crate::recalibration::WeightsConfig;
    use chrono::{Duration, Utc};

    fn stats(accuracy: Decimal, gap: Decimal) -> WeightStats {
        WeightStats {
            window: TimeWindow::trailing(Utc::now(), Duration::days(30)),
            samples: 20,
            hits: 0,
            accuracy,
            mean_confidence: accuracy + gap,
            confidence_gap: gap,
        }
    }

    async fn recalibrator(config: RecalibrationConfig) -> Recalibrator {
        let store: Arc<dyn GovernanceStore> = Arc::new(InMemoryStore::new());
        let book = WeightBook::load(store.clone(), &WeightsConfig::default())
            .await
            .unwrap();
        Recalibrator::new(store, Arc::new(book), Arc::new(LoggingNotifier), config).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(RecalibrationConfig::default().validate().is_empty());
    }

    #[test]
    fn test_tier_multiplier_is_monotonic() {
        let config = RecalibrationConfig::default();
        let mut last = Decimal::ZERO;
        let mut accuracy = Decimal::ZERO;
        while accuracy <= Decimal::ONE {
            let m = config.tier_multiplier(accuracy);
            assert!(m >= last, "multiplier fell at accuracy {}", accuracy);
            if accuracy <= config.chance_accuracy {
                assert!(m < Decimal::ONE);
            }
            last = m;
            accuracy += dec!(0.01);
        }
        assert!(config.tier_multiplier(dec!(0.9)) > Decimal::ONE);
    }

    #[test]
    fn test_chance_tier_at_one_rejected() {
        let config = RecalibrationConfig {
            tiers: vec![tier(dec!(0.70), dec!(1.5)), tier(dec!(0.45), dec!(1.0))],
            ..Default::default()
        };
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn test_zero_floor_rejected() {
        let config = RecalibrationConfig {
            weight_floor: Decimal::ZERO,
            ..Default::default()
        };
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn test_gap_correction_direction() {
        let config = RecalibrationConfig::default();
        assert!(config.gap_correction(dec!(0.3)) < Decimal::ONE);
        assert_eq!(config.gap_correction(dec!(0.1)), Decimal::ONE);
        assert!(config.gap_correction(dec!(-0.3)) > Decimal::ONE);
    }

    #[tokio::test]
    async fn test_gap_correction_applies_after_tier() {
        let r = recalibrator(RecalibrationConfig::default()).await;
        let calibrated = r.compute_weight(dec!(1), &stats(dec!(0.72), dec!(0)));
        let overconfident = r.compute_weight(dec!(1), &stats(dec!(0.72), dec!(0.2)));
        let underconfident = r.compute_weight(dec!(1), &stats(dec!(0.72), dec!(-0.2)));
        assert_eq!(calibrated, dec!(1.5));
        assert_eq!(overconfident, dec!(1.2));
        assert_eq!(underconfident, dec!(1.575));
    }

    #[tokio::test]
    async fn test_weight_floored_above_zero() {
        let config = RecalibrationConfig {
            tiers: vec![tier(dec!(0.7), dec!(1.5)), tier(dec!(0.4), dec!(0.2))],
            floor_tier_multiplier: dec!(0.01),
            overconfidence_penalty: dec!(0.01),
            ..Default::default()
        };
        let r = recalibrator(config).await;
        let w = r.compute_weight(dec!(1), &stats(Decimal::ZERO, dec!(0.9)));
        assert_eq!(w, r.config().weight_floor);
        assert!(w > Decimal::ZERO);
    }
}
