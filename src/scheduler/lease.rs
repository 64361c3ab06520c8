use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::persistence::GovernanceStore;

/// Mutual exclusion for a periodic job.
///
/// Two layers: an in-process guard so an overlapping tick of the same job is
/// skipped, and a store lease so a second process cannot run the job at the
/// same time. The lease TTL must outlive one run of the job.
#[derive(Clone)]
pub struct JobLease {
    job: String,
    holder: String,
    ttl: Duration,
    store: Arc<dyn GovernanceStore>,
    local: Arc<Mutex<()>>,
}

impl JobLease {
    pub fn new(job: &str, holder: &str, ttl: Duration, store: Arc<dyn GovernanceStore>) -> Self {
        Self {
            job: job.to_string(),
            holder: holder.to_string(),
            ttl,
            store,
            local: Arc::new(Mutex::new(())),
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    /// Run `work` while holding the lease. `Ok(None)` means the run was skipped.
    pub async fn run<T, Fut>(&self, work: Fut) -> Result<Option<T>>
    where
        Fut: Future<Output = Result<T>>,
    {
        let Ok(_local) = self.local.try_lock() else {
            info!(job = %self.job, "previous run still in progress; skipping tick");
            return Ok(None);
        };

        if !self
            .store
            .try_acquire_lease(&self.job, &self.holder, self.ttl)
            .await?
        {
            info!(job = %self.job, holder = %self.holder, "lease held elsewhere; skipping tick");
            return Ok(None);
        }

        let result = work.await;

        if let Err(e) = self.store.release_lease(&self.job, &self.holder).await {
            warn!(job = %self.job, error = %e, "failed to release job lease; it will expire");
        }
        result.map(Some)
    }
}
