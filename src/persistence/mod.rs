//! Durable governance records
//!
//! Logs here are append-only: votes, decisions and their lifecycle states,
//! settlements, ruleset versions and performance records. The only mutable
//! rows are shadow positions (one transition out of OPEN), the current
//! agent weight (history kept alongside) and job leases.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    AgentWeight, Decision, DecisionStateEntry, PerformanceRecord, Settlement, ShadowPosition,
    ShadowStatus, TimeWindow, Vote,
};
use crate::error::Result;
use crate::policy::RulesetRecord;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GovernanceStore: Send + Sync {
    // ==================== Votes ====================

    async fn append_votes(&self, votes: &[Vote]) -> Result<()>;

    async fn votes_for_round(&self, round_id: Uuid) -> Result<Vec<Vote>>;

    // ==================== Decisions ====================

    async fn append_decision(&self, decision: &Decision) -> Result<()>;

    async fn decision(&self, decision_id: Uuid) -> Result<Option<Decision>>;

    async fn append_decision_state(&self, entry: &DecisionStateEntry) -> Result<()>;

    /// Lifecycle entries in the order they were recorded
    async fn decision_states(&self, decision_id: Uuid) -> Result<Vec<DecisionStateEntry>>;

    async fn record_settlement(&self, settlement: &Settlement) -> Result<()>;

    async fn settlements_between(&self, window: TimeWindow) -> Result<Vec<Settlement>>;

    // ==================== Rulesets ====================

    /// Fails if the version already exists
    async fn append_ruleset(&self, record: &RulesetRecord) -> Result<()>;

    /// Newest version first
    async fn ruleset_history(&self, limit: usize) -> Result<Vec<RulesetRecord>>;

    // ==================== Shadow positions ====================

    async fn insert_shadow(&self, position: &ShadowPosition) -> Result<()>;

    /// Replace a position that is still OPEN; anything else is an invalid transition.
    async fn update_shadow(&self, position: &ShadowPosition) -> Result<()>;

    async fn shadow(&self, id: Uuid) -> Result<Option<ShadowPosition>>;

    async fn shadow_for_decision(&self, decision_id: Uuid) -> Result<Option<ShadowPosition>>;

    /// OPEN positions with `matures_at <= now`, oldest first
    async fn due_shadows(&self, now: DateTime<Utc>) -> Result<Vec<ShadowPosition>>;

    /// MATURED positions resolved inside the window
    async fn matured_shadows_between(&self, window: TimeWindow) -> Result<Vec<ShadowPosition>>;

    async fn shadows_by_status(&self, status: ShadowStatus, limit: usize)
        -> Result<Vec<ShadowPosition>>;

    // ==================== Agent weights ====================

    async fn current_weights(&self) -> Result<Vec<AgentWeight>>;

    /// Overwrite the current weight and append it to the history
    async fn save_weight(&self, weight: &AgentWeight) -> Result<()>;

    /// Newest first
    async fn weight_history(&self, agent_id: &str, limit: usize) -> Result<Vec<AgentWeight>>;

    // ==================== Performance ====================

    /// Append records, skipping (decision, agent) pairs already present.
    /// Returns how many were new.
    async fn append_performance(&self, records: &[PerformanceRecord]) -> Result<usize>;

    async fn performance_between(&self, window: TimeWindow) -> Result<Vec<PerformanceRecord>>;

    // ==================== Job leases ====================

    /// Take or renew the lease on `job`. False while another holder's lease is live.
    async fn try_acquire_lease(&self, job: &str, holder: &str, ttl: Duration) -> Result<bool>;

    async fn release_lease(&self, job: &str, holder: &str) -> Result<()>;
}
