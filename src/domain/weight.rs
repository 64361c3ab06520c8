//! Agent voting weights

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::window::TimeWindow;

/// Statistics a weight was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightStats {
    pub window: TimeWindow,
    pub samples: usize,
    pub hits: usize,
    pub accuracy: Decimal,
    pub mean_confidence: Decimal,
    /// mean_confidence - accuracy; positive means overconfident
    pub confidence_gap: Decimal,
}

/// Current voting multiplier for one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentWeight {
    pub agent_id: String,
    pub weight: Decimal,
    /// None for the default weight assigned at registration
    pub stats: Option<WeightStats>,
    pub updated_at: DateTime<Utc>,
}

impl AgentWeight {
    pub fn initial(agent_id: &str, weight: Decimal, at: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            weight,
            stats: None,
            updated_at: at,
        }
    }
}

/// Immutable weight table read on the decision path
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeightTable {
    default_weight: Decimal,
    weights: BTreeMap<String, AgentWeight>,
}

impl WeightTable {
    pub fn new(default_weight: Decimal) -> Self {
        Self {
            default_weight,
            weights: BTreeMap::new(),
        }
    }

    pub fn from_weights(default_weight: Decimal, weights: impl IntoIterator<Item = AgentWeight>) -> Self {
        Self {
            default_weight,
            weights: weights
                .into_iter()
                .map(|w| (w.agent_id.clone(), w))
                .collect(),
        }
    }

    /// Weight for an agent; unknown agents vote with the default weight
    pub fn weight_of(&self, agent_id: &str) -> Decimal {
        self.weights
            .get(agent_id)
            .map(|w| w.weight)
            .unwrap_or(self.default_weight)
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentWeight> {
        self.weights.get(agent_id)
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.weights.contains_key(agent_id)
    }

    pub fn default_weight(&self) -> Decimal {
        self.default_weight
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentWeight> {
        self.weights.values()
    }

    /// Copy of this table with the given weights replaced
    pub fn with_updates(&self, updates: impl IntoIterator<Item = AgentWeight>) -> Self {
        let mut next = self.clone();
        for w in updates {
            next.weights.insert(w.agent_id.clone(), w);
        }
        next
    }
}
