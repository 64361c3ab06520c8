//! Periodic background jobs
//!
//! Two jobs run on their own cadence, each under its own lease:
//! - maturity sweep of shadow positions
//! - attribution followed by weight recalibration over a trailing window

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::lease::JobLease;
use super::retry::{retry_transient, BackoffPolicy};
use crate::attribution::PerformanceAttributor;
use crate::domain::TimeWindow;
use crate::error::Result;
use crate::persistence::GovernanceStore;
use crate::recalibration::{RecalibrationReport, Recalibrator};
use crate::shadow::{CounterfactualTracker, SweepReport};

pub const SWEEP_JOB: &str = "shadow_sweep";
pub const RECALIBRATION_JOB: &str = "recalibration";

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_recalibration_interval_secs")]
    pub recalibration_interval_secs: u64,
    /// Trailing window the recalibration reads
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    /// Must outlive one run of either job
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// Lease holder name; defaults to a per-process id
    #[serde(default)]
    pub holder_id: Option<String>,
    #[serde(default)]
    pub retry: BackoffPolicy,
}

fn default_sweep_interval_secs() -> u64 {
    3_600
}
fn default_recalibration_interval_secs() -> u64 {
    86_400
}
fn default_window_days() -> i64 {
    30
}
fn default_lease_ttl_secs() -> u64 {
    900
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            recalibration_interval_secs: default_recalibration_interval_secs(),
            window_days: default_window_days(),
            lease_ttl_secs: default_lease_ttl_secs(),
            holder_id: None,
            retry: BackoffPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.sweep_interval_secs == 0 {
            errors.push("scheduler.sweep_interval_secs must be positive".to_string());
        }
        if self.recalibration_interval_secs == 0 {
            errors.push("scheduler.recalibration_interval_secs must be positive".to_string());
        }
        if self.window_days <= 0 {
            errors.push("scheduler.window_days must be positive".to_string());
        }
        if self.lease_ttl_secs == 0 {
            errors.push("scheduler.lease_ttl_secs must be positive".to_string());
        }
        errors.extend(self.retry.validate("scheduler.retry"));
        errors
    }

    pub fn holder(&self) -> String {
        self.holder_id
            .clone()
            .unwrap_or_else(|| format!("quorum-{}", std::process::id()))
    }

    /// Trailing window ending at the last recalibration boundary before `now`.
    ///
    /// Every tick inside one interval sees the same window.
    pub fn recalibration_window(&self, now: DateTime<Utc>) -> TimeWindow {
        let step = self.recalibration_interval_secs.max(1) as i64;
        let aligned = now.timestamp().div_euclid(step) * step;
        let end = Utc.timestamp_opt(aligned, 0).single().unwrap_or(now);
        TimeWindow::trailing(end, ChronoDuration::days(self.window_days))
    }
}

pub struct Scheduler {
    tracker: Arc<CounterfactualTracker>,
    attributor: Arc<PerformanceAttributor>,
    recalibrator: Arc<Recalibrator>,
    sweep_lease: JobLease,
    recalibration_lease: JobLease,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        tracker: Arc<CounterfactualTracker>,
        attributor: Arc<PerformanceAttributor>,
        recalibrator: Arc<Recalibrator>,
        config: SchedulerConfig,
    ) -> Self {
        let holder = config.holder();
        let ttl = Duration::from_secs(config.lease_ttl_secs);
        Self {
            tracker,
            attributor,
            recalibrator,
            sweep_lease: JobLease::new(SWEEP_JOB, &holder, ttl, store.clone()),
            recalibration_lease: JobLease::new(RECALIBRATION_JOB, &holder, ttl, store),
            config,
        }
    }

    /// One sweep tick. `Ok(None)` when another run holds the lease.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<Option<SweepReport>> {
        let tracker = &self.tracker;
        self.sweep_lease
            .run(retry_transient(&self.config.retry, SWEEP_JOB, move || {
                tracker.sweep(now)
            }))
            .await
    }

    /// One recalibration tick: attribute the window, then recalibrate it.
    pub async fn run_recalibration(
        &self,
        window: TimeWindow,
    ) -> Result<Option<RecalibrationReport>> {
        let attributor = &self.attributor;
        let recalibrator = &self.recalibrator;
        let retry = &self.config.retry;
        self.recalibration_lease
            .run(async move {
                retry_transient(retry, "attribution", move || attributor.attribute(window)).await?;
                retry_transient(retry, RECALIBRATION_JOB, move || recalibrator.recalibrate(window)).await
            })
            .await
    }

    /// Drive both jobs until shutdown is signalled.
    pub fn start(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_timer =
                tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
            sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut recalibration_timer = tokio::time::interval(Duration::from_secs(
                self.config.recalibration_interval_secs,
            ));
            recalibration_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                sweep_interval_secs = self.config.sweep_interval_secs,
                recalibration_interval_secs = self.config.recalibration_interval_secs,
                window_days = self.config.window_days,
                "scheduler started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("scheduler stopping");
                        break;
                    }
                    _ = sweep_timer.tick() => {
                        if let Err(e) = self.run_sweep(Utc::now()).await {
                            error!(job = SWEEP_JOB, error = %e, "job failed");
                        }
                    }
                    _ = recalibration_timer.tick() => {
                        let window = self.config.recalibration_window(Utc::now());
                        if let Err(e) = self.run_recalibration(window).await {
                            error!(job = RECALIBRATION_JOB, error = %e, "job failed");
                        }
                    }
                }
            }
        })
    }
}
