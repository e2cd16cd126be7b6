//! Bounded polling.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Fixed-interval polling with an overall deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Default for the HA operator privilege check: every 2s for 60s
    pub fn role_privileges() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(60))
    }

    /// Default for workload pods to reach zero replicas: every 10s for an hour
    pub fn pods_stopped() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(3600))
    }
}

/// Call `check` until it returns `true` or the policy's timeout has elapsed
///
/// Returns `Ok(false)` on timeout so the caller can describe what it was waiting for.
/// Errors from `check` abort the wait immediately.
pub async fn poll_until<F, Fut>(policy: &PollPolicy, mut check: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let started = Instant::now();
    loop {
        if check().await? {
            return Ok(true);
        }
        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Ok(false);
        }
        sleep(policy.interval.min(policy.timeout - elapsed)).await;
    }
}
