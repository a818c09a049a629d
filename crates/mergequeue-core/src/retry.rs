//! Composable retry/backoff combinators.
//!
//! The host platform's HTTP surface is flaky in two distinct ways the core
//! must account for without hand-rolled loops scattered across call sites:
//! general transient failures (timeouts, 5xx, rate limiting) and a narrower
//! eventual-consistency window right after a ref is created, where the new
//! base is briefly invisible to the merge endpoint.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// `max(retry-after, 0) + exponential(multiplier * 2^attempt)`, reraising the
/// last error once the attempt budget is exhausted.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// General HostAPI policy: 5 attempts, retries transport/5xx/429 (spec §6.1, §7.1).
    pub fn host_api() -> Self {
        Self {
            max_attempts: 5,
            multiplier: 0.2,
        }
    }

    /// Eventual-consistency policy for "Base does not exist" during car
    /// creation: 4 attempts, no Retry-After component (spec §4.2.2, §7.2).
    pub fn eventual_consistency() -> Self {
        Self {
            max_attempts: 4,
            multiplier: 0.2,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.multiplier * 2f64.powi(attempt as i32 - 1))
    }

    /// Runs `op`, retrying while `should_retry` returns `Some(extra_wait)`,
    /// up to `max_attempts`. Sleeps `extra_wait + exponential backoff` between
    /// attempts.
    pub async fn run<T, F, Fut>(
        &self,
        mut should_retry: impl FnMut(&Error) -> Option<Duration>,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    match should_retry(&err) {
                        Some(extra) => {
                            tracing::debug!(attempt, error = %err, "retrying host operation");
                            tokio::time::sleep(extra + self.backoff(attempt)).await;
                        }
                        None => return Err(err),
                    }
                }
            }
        }
    }

    /// Retries on transport/5xx/429, honoring a Retry-After header when present.
    pub async fn run_host_api<T, F, Fut>(op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        Self::host_api()
            .run(
                |err| {
                    if err.is_host_transient() {
                        Some(err.retry_after().unwrap_or(Duration::ZERO))
                    } else {
                        None
                    }
                },
                op,
            )
            .await
    }

    /// Retries only on "Base does not exist" (spec §4.2.2).
    pub async fn run_eventual_consistency<T, F, Fut>(op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        Self::eventual_consistency()
            .run(
                |err| {
                    if err.is_base_does_not_exist() {
                        Some(Duration::ZERO)
                    } else {
                        None
                    }
                },
                op,
            )
            .await
    }
}
