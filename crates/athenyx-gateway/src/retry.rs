//! Bounded retry for transient failures.
//!
//! Only `ApiError::Transient` is retried. `Unauthenticated`, `SessionExpired`,
//! `Permanent`, and `Cancelled` all fail on the first occurrence. The backoff
//! sleep races against the caller's cancellation token so an abort never waits
//! out the delay.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use athenyx_common::ApiError;

/// Retry budget for one logical call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first (1 = at most two calls total).
    pub budget: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: 1,
            backoff: Duration::from_secs(1),
        }
    }
}

/// One dispatch within a call chain. Exists only while the chain runs.
#[derive(Debug, Clone, Copy)]
pub struct Attempt {
    /// 0 on the first dispatch.
    pub number: u32,
    /// Attempts left after this one.
    pub remaining: u32,
}

/// Run `op` until it succeeds, fails non-transiently, or the budget is spent.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        let outcome = op(Attempt {
            number: attempt,
            remaining: policy.budget.saturating_sub(attempt),
        })
        .await;

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.budget => {
                warn!(
                    attempt = attempt + 1,
                    budget = policy.budget,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying after backoff"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                    _ = tokio::time::sleep(policy.backoff) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
