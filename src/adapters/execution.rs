use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::ExecutionVenue;
use crate::domain::Decision;
use crate::error::Result;

/// Execution venue that records submissions instead of placing orders
#[derive(Debug, Clone, Default)]
pub struct DryRunExecution {
    submitted: Arc<RwLock<Vec<Uuid>>>,
}

impl DryRunExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decision ids submitted so far, in order
    pub async fn submitted(&self) -> Vec<Uuid> {
        self.submitted.read().await.clone()
    }
}

#[async_trait]
impl ExecutionVenue for DryRunExecution {
    async fn submit(&self, decision: &Decision) -> Result<()> {
        info!(
            decision_id = %decision.id,
            instrument = %decision.instrument,
            action = %decision.action,
            notional = %decision.notional,
            "[DRY RUN] would submit order"
        );
        self.submitted.write().await.push(decision.id);
        Ok(())
    }
}
