//! In-process approval desk
//!
//! Holds approval requests until an operator answers them. Nothing here ever
//! answers on its own: an unanswered request stays pending for as long as the
//! process lives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::info;
use uuid::Uuid;

use super::{ApprovalChannel, ApprovalResponse};
use crate::domain::{Action, Decision};
use crate::error::{QuorumError, Result};

/// Summary of a request waiting for an operator
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    pub decision_id: Uuid,
    pub instrument: String,
    pub action: Action,
    pub rule_ids: Vec<String>,
    pub requested_at: DateTime<Utc>,
}

struct Waiting {
    summary: PendingApproval,
    reply: oneshot::Sender<ApprovalResponse>,
}

#[derive(Clone, Default)]
pub struct ManualApprovalDesk {
    waiting: Arc<Mutex<HashMap<Uuid, Waiting>>>,
}

impl ManualApprovalDesk {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pending(&self) -> Vec<PendingApproval> {
        let waiting = self.waiting.lock().await;
        let mut list: Vec<PendingApproval> = waiting.values().map(|w| w.summary.clone()).collect();
        list.sort_by_key(|p| p.requested_at);
        list
    }

    /// Answer a pending request
    pub async fn resolve(&self, decision_id: Uuid, response: ApprovalResponse) -> Result<()> {
        let entry = self
            .waiting
            .lock()
            .await
            .remove(&decision_id)
            .ok_or_else(|| QuorumError::NotFound(format!("approval request {}", decision_id)))?;

        info!(
            %decision_id,
            approved = response.approved,
            approver = %response.approver,
            "approval resolved"
        );
        entry
            .reply
            .send(response)
            .map_err(|_| QuorumError::Internal("approval requester went away".into()))
    }
}

#[async_trait]
impl ApprovalChannel for ManualApprovalDesk {
    async fn request_approval(
        &self,
        decision: &Decision,
        rule_ids: &[String],
    ) -> Result<ApprovalResponse> {
        let (tx, rx) = oneshot::channel();
        let summary = PendingApproval {
            decision_id: decision.id,
            instrument: decision.instrument.clone(),
            action: decision.action,
            rule_ids: rule_ids.to_vec(),
            requested_at: Utc::now(),
        };
        self.waiting.lock().await.insert(
            decision.id,
            Waiting {
                summary,
                reply: tx,
            },
        );
        info!(decision_id = %decision.id, ?rule_ids, "approval requested");

        rx.await.map_err(|_| QuorumError::Cancelled)
    }
}
