use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::domain::{AgentWeight, WeightTable};
use crate::error::Result;
use crate::persistence::GovernanceStore;
use crate::snapshot::{SnapshotCell, Versioned};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsConfig {
    /// Weight of a newly registered agent
    #[serde(default = "default_weight")]
    pub default_weight: Decimal,
}

fn default_weight() -> Decimal {
    dec!(1.0)
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            default_weight: default_weight(),
        }
    }
}

impl WeightsConfig {
    pub fn validate(&self) -> Vec<String> {
        if self.default_weight <= Decimal::ZERO {
            vec!["weights.default_weight must be positive".to_string()]
        } else {
            Vec::new()
        }
    }
}

/// Owner of the published weight table.
///
/// Rounds read `snapshot()` once and keep that version for the whole round.
/// Only registration and the recalibrator publish.
pub struct WeightBook {
    store: Arc<dyn GovernanceStore>,
    cell: SnapshotCell<WeightTable>,
}

impl WeightBook {
    pub async fn load(store: Arc<dyn GovernanceStore>, config: &WeightsConfig) -> Result<Self> {
        let current = store.current_weights().await?;
        let count = current.len();
        let book = Self {
            store,
            cell: SnapshotCell::new(WeightTable::new(config.default_weight)),
        };
        if count > 0 {
            book.cell
                .publish(WeightTable::from_weights(config.default_weight, current));
        }
        info!(agents = count, default_weight = %config.default_weight, "weight table loaded");
        Ok(book)
    }

    pub fn snapshot(&self) -> Arc<Versioned<WeightTable>> {
        self.cell.load()
    }

    pub fn generation(&self) -> u64 {
        self.cell.generation()
    }

    /// Give a first-time agent the default weight. Existing weights are kept.
    pub async fn register(&self, agent_id: &str) -> Result<AgentWeight> {
        let table = self.snapshot();
        if let Some(existing) = table.get(agent_id) {
            return Ok(existing.clone());
        }

        let weight = AgentWeight::initial(agent_id, table.default_weight(), Utc::now());
        self.store.save_weight(&weight).await?;
        let generation = self.publish(vec![weight.clone()]);
        info!(agent_id, weight = %weight.weight, generation, "agent weight initialised");
        Ok(weight)
    }

    /// Publish a new table with `updates` applied; returns its generation.
    pub fn publish(&self, updates: Vec<AgentWeight>) -> u64 {
        self.cell.update(|table| table.with_updates(updates.iter().cloned()))
    }

    pub async fn history(&self, agent_id: &str, limit: usize) -> Result<Vec<AgentWeight>> {
        self.store.weight_history(agent_id, limit).await
    }
}
