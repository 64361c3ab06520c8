//! Bounded retry with exponential backoff for transient data-source failures

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Total attempts, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    /// Delay after the `retry`-th failure (0-based)
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry));
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn validate(&self, section: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_attempts == 0 {
            errors.push(format!("{}.max_attempts must be at least 1", section));
        }
        if self.base_delay_ms > self.max_delay_ms {
            errors.push(format!(
                "{}.base_delay_ms must not exceed max_delay_ms",
                section
            ));
        }
        errors
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. Returns the last error in the latter two cases.
pub async fn retry_transient<T, F, Fut>(policy: &BackoffPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let delay = policy.backoff_duration(attempt);
                warn!(
                    operation = what,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuorumError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
        };
        assert_eq!(policy.backoff_duration(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_duration(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_duration(5), Duration::from_secs(32));
        assert_eq!(policy.backoff_duration(6), Duration::from_secs(60)); // capped
        assert_eq!(policy.backoff_duration(40), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_transient_errors_retried_up_to_bound() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&fast(), "price", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(QuorumError::DataUnavailable("AAPL".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_logic_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&fast(), "write", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(QuorumError::Validation("bad".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let value = retry_transient(&fast(), "price", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(QuorumError::DataUnavailable("AAPL".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
    }
}
