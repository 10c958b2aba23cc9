//! Bounded timeout + retry for external service calls.
//!
//! Every attempt is capped by the configured timeout; a timeout counts as a
//! failure. After `retries` extra attempts the last error is returned and
//! the caller substitutes its fallback.

use crate::error::{CascadeError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempt budget for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Service name used in logs and timeout errors.
    pub stage: &'static str,
    /// Cap on each individual attempt.
    pub timeout: Duration,
    /// Extra attempts after the first failure.
    pub retries: u32,
}

impl RetryPolicy {
    pub fn new(stage: &'static str, timeout_ms: u64, retries: u32) -> Self {
        Self {
            stage,
            timeout: Duration::from_millis(timeout_ms),
            retries,
        }
    }

    /// Upper bound on the time [`call_with_retry`] can take.
    pub fn worst_case(&self) -> Duration {
        self.timeout * (self.retries + 1)
    }
}

/// Run `attempt` until it succeeds or the policy is exhausted.
///
/// # Errors
///
/// Returns the last attempt's error ([`CascadeError::Timeout`] if it timed out).
pub async fn call_with_retry<T, F, Fut>(policy: RetryPolicy, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.retries + 1;
    let mut last_err = None;
    for n in 1..=attempts {
        let outcome = match tokio::time::timeout(policy.timeout, attempt()).await {
            Ok(result) => result,
            Err(_) => Err(CascadeError::Timeout {
                stage: policy.stage,
                after_ms: u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        match outcome {
            Ok(value) => {
                if n > 1 {
                    debug!(stage = policy.stage, attempt = n, "service recovered on retry");
                }
                return Ok(value);
            }
            Err(e) => {
                warn!(stage = policy.stage, attempt = n, attempts, "service call failed: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        CascadeError::Invariant(format!("{} retry loop made no attempt", policy.stage))
    }))
}
