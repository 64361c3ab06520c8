//! In-process store for tests and single-node runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::GovernanceStore;
use crate::domain::{
    AgentWeight, Decision, DecisionStateEntry, PerformanceRecord, Settlement, ShadowPosition,
    ShadowStatus, TimeWindow, Vote,
};
use crate::error::{QuorumError, Result};
use crate::policy::RulesetRecord;

#[derive(Default)]
struct Tables {
    votes: Vec<Vote>,
    decisions: HashMap<Uuid, Decision>,
    decision_states: Vec<DecisionStateEntry>,
    settlements: Vec<Settlement>,
    rulesets: BTreeMap<u64, RulesetRecord>,
    shadows: BTreeMap<Uuid, ShadowPosition>,
    weights: BTreeMap<String, AgentWeight>,
    weight_history: Vec<AgentWeight>,
    performance: Vec<PerformanceRecord>,
    performance_keys: HashSet<(Uuid, String)>,
    leases: HashMap<String, Lease>,
}

struct Lease {
    holder: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite the newest ruleset document in place, keeping its recorded hash.
    ///
    /// Simulates out-of-band edits to the ruleset log.
    pub async fn tamper_latest_ruleset<F>(&self, edit: F)
    where
        F: FnOnce(&str) -> String,
    {
        let mut tables = self.tables.write().await;
        if let Some((_, record)) = tables.rulesets.iter_mut().next_back() {
            record.document = edit(&record.document);
        }
    }

    pub async fn vote_count(&self) -> usize {
        self.tables.read().await.votes.len()
    }

    pub async fn decision_count(&self) -> usize {
        self.tables.read().await.decisions.len()
    }
}

#[async_trait]
impl GovernanceStore for InMemoryStore {
    async fn append_votes(&self, votes: &[Vote]) -> Result<()> {
        self.tables.write().await.votes.extend_from_slice(votes);
        Ok(())
    }

    async fn votes_for_round(&self, round_id: Uuid) -> Result<Vec<Vote>> {
        let tables = self.tables.read().await;
        let mut votes: Vec<Vote> = tables
            .votes
            .iter()
            .filter(|v| v.round_id == round_id)
            .cloned()
            .collect();
        votes.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(votes)
    }

    async fn append_decision(&self, decision: &Decision) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.decisions.contains_key(&decision.id) {
            return Err(QuorumError::Validation(format!(
                "decision {} already recorded",
                decision.id
            )));
        }
        tables.decisions.insert(decision.id, decision.clone());
        Ok(())
    }

    async fn decision(&self, decision_id: Uuid) -> Result<Option<Decision>> {
        Ok(self.tables.read().await.decisions.get(&decision_id).cloned())
    }

    async fn append_decision_state(&self, entry: &DecisionStateEntry) -> Result<()> {
        self.tables.write().await.decision_states.push(entry.clone());
        Ok(())
    }

    async fn decision_states(&self, decision_id: Uuid) -> Result<Vec<DecisionStateEntry>> {
        Ok(self
            .tables
            .read()
            .await
            .decision_states
            .iter()
            .filter(|e| e.decision_id == decision_id)
            .cloned()
            .collect())
    }

    async fn record_settlement(&self, settlement: &Settlement) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .settlements
            .iter()
            .any(|s| s.decision_id == settlement.decision_id)
        {
            return Err(QuorumError::Validation(format!(
                "decision {} already settled",
                settlement.decision_id
            )));
        }
        tables.settlements.push(settlement.clone());
        Ok(())
    }

    async fn settlements_between(&self, window: TimeWindow) -> Result<Vec<Settlement>> {
        Ok(self
            .tables
            .read()
            .await
            .settlements
            .iter()
            .filter(|s| window.contains(s.settled_at))
            .cloned()
            .collect())
    }

    async fn append_ruleset(&self, record: &RulesetRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.rulesets.contains_key(&record.version) {
            return Err(QuorumError::Validation(format!(
                "ruleset version {} already exists",
                record.version
            )));
        }
        tables.rulesets.insert(record.version, record.clone());
        Ok(())
    }

    async fn ruleset_history(&self, limit: usize) -> Result<Vec<RulesetRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .rulesets
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_shadow(&self, position: &ShadowPosition) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.shadows.contains_key(&position.id) {
            return Err(QuorumError::Validation(format!(
                "shadow position {} already exists",
                position.id
            )));
        }
        tables.shadows.insert(position.id, position.clone());
        Ok(())
    }

    async fn update_shadow(&self, position: &ShadowPosition) -> Result<()> {
        let mut tables = self.tables.write().await;
        let current = tables
            .shadows
            .get_mut(&position.id)
            .ok_or_else(|| QuorumError::NotFound(format!("shadow position {}", position.id)))?;
        if current.status != ShadowStatus::Open {
            return Err(QuorumError::InvalidStateTransition {
                from: current.status.to_string(),
                to: position.status.to_string(),
            });
        }
        *current = position.clone();
        Ok(())
    }

    async fn shadow(&self, id: Uuid) -> Result<Option<ShadowPosition>> {
        Ok(self.tables.read().await.shadows.get(&id).cloned())
    }

    async fn shadow_for_decision(&self, decision_id: Uuid) -> Result<Option<ShadowPosition>> {
        Ok(self
            .tables
            .read()
            .await
            .shadows
            .values()
            .find(|p| p.decision_id == decision_id)
            .cloned())
    }

    async fn due_shadows(&self, now: DateTime<Utc>) -> Result<Vec<ShadowPosition>> {
        let tables = self.tables.read().await;
        let mut due: Vec<ShadowPosition> = tables
            .shadows
            .values()
            .filter(|p| p.is_open() && p.matures_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.matures_at.cmp(&b.matures_at).then(a.id.cmp(&b.id)));
        Ok(due)
    }

    async fn matured_shadows_between(&self, window: TimeWindow) -> Result<Vec<ShadowPosition>> {
        Ok(self
            .tables
            .read()
            .await
            .shadows
            .values()
            .filter(|p| {
                p.status == ShadowStatus::Matured
                    && p.resolved_at.map(|t| window.contains(t)).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn shadows_by_status(
        &self,
        status: ShadowStatus,
        limit: usize,
    ) -> Result<Vec<ShadowPosition>> {
        let tables = self.tables.read().await;
        let mut list: Vec<ShadowPosition> = tables
            .shadows
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        list.truncate(limit);
        Ok(list)
    }

    async fn current_weights(&self) -> Result<Vec<AgentWeight>> {
        Ok(self.tables.read().await.weights.values().cloned().collect())
    }

    async fn save_weight(&self, weight: &AgentWeight) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .weights
            .insert(weight.agent_id.clone(), weight.clone());
        tables.weight_history.push(weight.clone());
        Ok(())
    }

    async fn weight_history(&self, agent_id: &str, limit: usize) -> Result<Vec<AgentWeight>> {
        Ok(self
            .tables
            .read()
            .await
            .weight_history
            .iter()
            .rev()
            .filter(|w| w.agent_id == agent_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append_performance(&self, records: &[PerformanceRecord]) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let mut inserted = 0;
        for record in records {
            let key = (record.decision_id, record.agent_id.clone());
            if tables.performance_keys.insert(key) {
                tables.performance.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn performance_between(&self, window: TimeWindow) -> Result<Vec<PerformanceRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .performance
            .iter()
            .filter(|r| window.contains(r.realized_at))
            .cloned()
            .collect())
    }

    async fn try_acquire_lease(&self, job: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| QuorumError::Validation(format!("lease ttl: {}", e)))?;
        let mut tables = self.tables.write().await;
        let free = match tables.leases.get(job) {
            None => true,
            Some(lease) => lease.expires_at <= now || lease.holder == holder,
        };
        if free {
            tables.leases.insert(
                job.to_string(),
                Lease {
                    holder: holder.to_string(),
                    expires_at: now + ttl,
                },
            );
        }
        Ok(free)
    }

    async fn release_lease(&self, job: &str, holder: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .leases
            .get(job)
            .map(|l| l.holder == holder)
            .unwrap_or(false)
        {
            tables.leases.remove(job);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, OutcomeSource};
    use rust_decimal_macros::dec;

    fn record(decision_id: Uuid, agent: &str) -> PerformanceRecord {
        PerformanceRecord {
            decision_id,
            agent_id: agent.to_string(),
            source: OutcomeSource::Shadow,
            voted_action: Action::Buy,
            direction_match: false,
            signed_return: dec!(-0.04),
            stated_confidence: dec!(0.8),
            realized_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_performance_dedupes_on_decision_and_agent() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let first = store
            .append_performance(&[record(id, "a"), record(id, "b")])
            .await
            .unwrap();
        let again = store
            .append_performance(&[record(id, "a"), record(id, "c")])
            .await
            .unwrap();
        assert_eq!(first, 2);
        assert_eq!(again, 1);
    }

    #[tokio::test]
    async fn test_lease_excludes_other_holders_until_released() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.try_acquire_lease("sweep", "node-a", ttl).await.unwrap());
        assert!(!store.try_acquire_lease("sweep", "node-b", ttl).await.unwrap());
        // Renewal by the holder
        assert!(store.try_acquire_lease("sweep", "node-a", ttl).await.unwrap());

        store.release_lease("sweep", "node-b").await.unwrap();
        assert!(!store.try_acquire_lease("sweep", "node-b", ttl).await.unwrap());
        store.release_lease("sweep", "node-a").await.unwrap();
        assert!(store.try_acquire_lease("sweep", "node-b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken() {
        let store = InMemoryStore::new();
        assert!(store
            .try_acquire_lease("recalibrate", "node-a", Duration::ZERO)
            .await
            .unwrap());
        assert!(store
            .try_acquire_lease("recalibrate", "node-b", Duration::from_secs(60))
            .await
            .unwrap());
    }
}
