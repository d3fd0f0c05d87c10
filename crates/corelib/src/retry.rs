//! Bounded exponential backoff for remote calls.
//!
//! Every remote call that used to spin until it got an answer goes through
//! `retry_with_backoff` instead: each attempt has a deadline, only transport
//! failures are retried, and the total number of attempts is capped.

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry budget for one kind of remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Deadline of a single attempt.
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 20,
            max_delay_ms: 2_000,
            attempt_timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once.
    pub fn no_retry(attempt_timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            attempt_timeout_ms: attempt_timeout.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the budget
/// in `policy` is used up.
///
/// `what` names the call in log lines and in `Error::RetriesExhausted`.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_retries + 1;
    let mut last = None;

    for attempt in 0..attempts {
        let result = match tokio::time::timeout(policy.attempt_timeout(), op()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(what.to_string())),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                tracing::debug!(what, attempt, error = %e, "retryable failure");
                last = Some(e);
            }
            Err(e) => return Err(e),
        }

        if attempt + 1 < attempts {
            let jitter = rand::thread_rng().gen_range(0..=policy.base_delay_ms.max(1));
            let delay = policy.delay_for(attempt) + Duration::from_millis(jitter);
            tokio::time::sleep(delay).await;
        }
    }

    let last = last.map(|e| e.to_string()).unwrap_or_default();
    tracing::warn!(what, attempts, last = %last, "giving up");
    Err(Error::RetriesExhausted {
        what: what.to_string(),
        attempts,
        last,
    })
}
