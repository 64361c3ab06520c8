//! Background job orchestration: leases, bounded retry, periodic ticks

pub mod jobs;
pub mod lease;
pub mod retry;

pub use jobs::{Scheduler, SchedulerConfig, RECALIBRATION_JOB, SWEEP_JOB};
pub use lease::JobLease;
pub use retry::{retry_transient, BackoffPolicy};
