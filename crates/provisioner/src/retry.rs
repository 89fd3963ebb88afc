//! Bounded retry for health checks.

use crate::resource::HealthCheck;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

/// Fixed-wait retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Wait between two attempts
    pub wait: Duration,
}

impl RetryPolicy {
    /// Create a new policy.
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self { max_attempts, wait }
    }

    /// Policy used to gate dependent resource groups: 15 attempts, 5 s apart.
    pub fn health_check() -> Self {
        Self::new(15, Duration::from_secs(5))
    }

    /// Worst-case time spent before giving up.
    pub fn max_wait(&self) -> Duration {
        self.wait * self.max_attempts.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::health_check()
    }
}

/// Run `check` until it reports healthy or the attempts run out.
///
/// Blocks the calling thread for `policy.wait` between attempts; there is
/// no wait after the final attempt. Returns whether the check eventually
/// passed. A policy with zero attempts runs the check once. An attempt
/// that panics counts as unhealthy and is retried like any other.
pub fn retry_while_unhealthy(policy: &RetryPolicy, check: &HealthCheck) -> bool {
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match panic::catch_unwind(AssertUnwindSafe(|| check.is_healthy())) {
            Ok(true) => return true,
            Ok(false) => {}
            Err(_) => log::warn!("healthcheck attempt {attempt}/{max_attempts} panicked"),
        }

        if attempt < max_attempts {
            log::debug!(
                "healthcheck attempt {attempt}/{max_attempts} failed, retrying in {:?}",
                policy.wait
            );
            thread::sleep(policy.wait);
        }
    }

    false
}
