use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::GovernanceStore;
use crate::domain::{
    AgentWeight, Decision, DecisionStateEntry, PerformanceRecord, Settlement, ShadowPosition,
    ShadowStatus, TimeWindow, Vote,
};
use crate::error::{QuorumError, Result};
use crate::policy::RulesetRecord;

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn payload<T: serde::de::DeserializeOwned>(row: &PgRow) -> Result<T> {
    let Json(value) = row.try_get::<Json<T>, _>("payload")?;
    Ok(value)
}

fn ruleset_record(row: &PgRow) -> Result<RulesetRecord> {
    let version: i64 = row.try_get("version")?;
    let Json(changelog) = row.try_get::<Json<Vec<String>>, _>("changelog")?;
    Ok(RulesetRecord {
        version: version as u64,
        document: row.try_get("document")?,
        content_hash: row.try_get("content_hash")?,
        previous_hash: row.try_get("previous_hash")?,
        reason: row.try_get("reason")?,
        authorizer: row.try_get("authorizer")?,
        changelog,
        recorded_at: row.try_get("recorded_at")?,
    })
}

#[async_trait]
impl GovernanceStore for PostgresStore {
    // ==================== Votes ====================

    #[instrument(skip(self, votes), fields(count = votes.len()))]
    async fn append_votes(&self, votes: &[Vote]) -> Result<()> {
        if votes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for vote in votes {
            sqlx::query(
                r#"
                INSERT INTO governance_votes (round_id, agent_id, payload, recorded_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(vote.round_id)
            .bind(&vote.agent_id)
            .bind(Json(vote))
            .bind(vote.recorded_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Appended {} votes", votes.len());
        Ok(())
    }

    async fn votes_for_round(&self, round_id: Uuid) -> Result<Vec<Vote>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM governance_votes
            WHERE round_id = $1
            ORDER BY agent_id ASC, id ASC
            "#,
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payload).collect()
    }

    // ==================== Decisions ====================

    #[instrument(skip(self, decision), fields(decision_id = %decision.id))]
    async fn append_decision(&self, decision: &Decision) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO governance_decisions (id, instrument, action, payload, decided_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(decision.id)
        .bind(&decision.instrument)
        .bind(decision.action.as_str())
        .bind(Json(decision))
        .bind(decision.decided_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn decision(&self, decision_id: Uuid) -> Result<Option<Decision>> {
        let row = sqlx::query("SELECT payload FROM governance_decisions WHERE id = $1")
            .bind(decision_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(payload).transpose()
    }

    async fn append_decision_state(&self, entry: &DecisionStateEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO governance_decision_states (decision_id, state, payload, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entry.decision_id)
        .bind(entry.state.name())
        .bind(Json(entry))
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn decision_states(&self, decision_id: Uuid) -> Result<Vec<DecisionStateEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM governance_decision_states
            WHERE decision_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(decision_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payload).collect()
    }

    async fn record_settlement(&self, settlement: &Settlement) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO governance_settlements (decision_id, realized_return, settled_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(settlement.decision_id)
        .bind(settlement.realized_return)
        .bind(settlement.settled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn settlements_between(&self, window: TimeWindow) -> Result<Vec<Settlement>> {
        let rows = sqlx::query(
            r#"
            SELECT decision_id, realized_return, settled_at
            FROM governance_settlements
            WHERE settled_at >= $1 AND settled_at < $2
            ORDER BY settled_at ASC
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(Settlement {
                    decision_id: r.try_get("decision_id")?,
                    realized_return: r.try_get("realized_return")?,
                    settled_at: r.try_get("settled_at")?,
                })
            })
            .collect()
    }

    // ==================== Rulesets ====================

    #[instrument(skip(self, record), fields(version = record.version))]
    async fn append_ruleset(&self, record: &RulesetRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO policy_rulesets
                (version, document, content_hash, previous_hash, reason, authorizer, changelog, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.version as i64)
        .bind(&record.document)
        .bind(&record.content_hash)
        .bind(&record.previous_hash)
        .bind(&record.reason)
        .bind(&record.authorizer)
        .bind(Json(&record.changelog))
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ruleset_history(&self, limit: usize) -> Result<Vec<RulesetRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT version, document, content_hash, previous_hash, reason, authorizer, changelog, recorded_at
            FROM policy_rulesets
            ORDER BY version DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(ruleset_record).collect()
    }

    // ==================== Shadow positions ====================

    async fn insert_shadow(&self, position: &ShadowPosition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO shadow_positions
                (id, decision_id, status, opened_at, matures_at, resolved_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(position.id)
        .bind(position.decision_id)
        .bind(position.status.as_str())
        .bind(position.opened_at)
        .bind(position.matures_at)
        .bind(position.resolved_at)
        .bind(Json(position))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, position), fields(shadow_id = %position.id, status = %position.status))]
    async fn update_shadow(&self, position: &ShadowPosition) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE shadow_positions
            SET status = $2, resolved_at = $3, payload = $4
            WHERE id = $1 AND status = 'OPEN'
            "#,
        )
        .bind(position.id)
        .bind(position.status.as_str())
        .bind(position.resolved_at)
        .bind(Json(position))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM shadow_positions WHERE id = $1")
                .bind(position.id)
                .fetch_optional(&self.pool)
                .await?;
        match current {
            None => Err(QuorumError::NotFound(format!("shadow position {}", position.id))),
            Some(from) => Err(QuorumError::InvalidStateTransition {
                from,
                to: position.status.to_string(),
            }),
        }
    }

    async fn shadow(&self, id: Uuid) -> Result<Option<ShadowPosition>> {
        let row = sqlx::query("SELECT payload FROM shadow_positions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(payload).transpose()
    }

    async fn shadow_for_decision(&self, decision_id: Uuid) -> Result<Option<ShadowPosition>> {
        let row = sqlx::query("SELECT payload FROM shadow_positions WHERE decision_id = $1")
            .bind(decision_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(payload).transpose()
    }

    async fn due_shadows(&self, now: DateTime<Utc>) -> Result<Vec<ShadowPosition>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM shadow_positions
            WHERE status = 'OPEN' AND matures_at <= $1
            ORDER BY matures_at ASC, id ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payload).collect()
    }

    async fn matured_shadows_between(&self, window: TimeWindow) -> Result<Vec<ShadowPosition>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM shadow_positions
            WHERE status = 'MATURED' AND resolved_at >= $1 AND resolved_at < $2
            ORDER BY resolved_at ASC, id ASC
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payload).collect()
    }

    async fn shadows_by_status(
        &self,
        status: ShadowStatus,
        limit: usize,
    ) -> Result<Vec<ShadowPosition>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM shadow_positions
            WHERE status = $1
            ORDER BY opened_at DESC
            LIMIT $2
            "#,
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payload).collect()
    }

    // ==================== Agent weights ====================

    async fn current_weights(&self) -> Result<Vec<AgentWeight>> {
        let rows = sqlx::query("SELECT payload FROM agent_weights ORDER BY agent_id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(payload).collect()
    }

    #[instrument(skip(self, weight), fields(agent_id = %weight.agent_id, weight = %weight.weight))]
    async fn save_weight(&self, weight: &AgentWeight) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO agent_weights (agent_id, weight, payload, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (agent_id) DO UPDATE SET
                weight = EXCLUDED.weight,
                payload = EXCLUDED.payload,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&weight.agent_id)
        .bind(weight.weight)
        .bind(Json(weight))
        .bind(weight.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO agent_weight_history (agent_id, weight, payload, updated_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&weight.agent_id)
        .bind(weight.weight)
        .bind(Json(weight))
        .bind(weight.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn weight_history(&self, agent_id: &str, limit: usize) -> Result<Vec<AgentWeight>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM agent_weight_history
            WHERE agent_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payload).collect()
    }

    // ==================== Performance ====================

    async fn append_performance(&self, records: &[PerformanceRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO performance_records (decision_id, agent_id, realized_at, payload)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (decision_id, agent_id) DO NOTHING
                "#,
            )
            .bind(record.decision_id)
            .bind(&record.agent_id)
            .bind(record.realized_at)
            .bind(Json(record))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;

        debug!(inserted, total = records.len(), "Appended performance records");
        Ok(inserted)
    }

    async fn performance_between(&self, window: TimeWindow) -> Result<Vec<PerformanceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM performance_records
            WHERE realized_at >= $1 AND realized_at < $2
            ORDER BY realized_at ASC, decision_id ASC, agent_id ASC
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payload).collect()
    }

    // ==================== Job leases ====================

    async fn try_acquire_lease(&self, job: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_leases (job, holder, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (job) DO UPDATE SET
                holder = EXCLUDED.holder,
                expires_at = EXCLUDED.expires_at
            WHERE job_leases.expires_at <= NOW() OR job_leases.holder = EXCLUDED.holder
            RETURNING holder
            "#,
        )
        .bind(job)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn release_lease(&self, job: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM job_leases WHERE job = $1 AND holder = $2")
            .bind(job)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
