//! Bounded retry helper for backend operations.
//!
//! Every state transition the supervisor drives (start, pause, resume,
//! save) is "issue a command, observe, maybe wait and try again". This
//! module holds that loop once, parameterized by a [`RetryPolicy`].

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }
}

/// Result of [`retry_with_backoff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// An attempt produced a value the confirmation accepted.
    Confirmed { value: T, attempts: u32 },
    /// Attempts ran out; `last` is the final observation.
    Exhausted { last: T, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Confirmed { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

/// Runs `attempt` until `confirm` accepts its output or the policy's
/// attempts are used up.
///
/// Sleeps `policy.delay` between attempts but not after the last one.
///
/// # Arguments
/// - `policy`: attempt count and delay
/// - `operation`: name used in log lines
/// - `attempt`: produces one observation per call
/// - `confirm`: decides whether an observation counts as success
pub async fn retry_with_backoff<T, F, Fut, P>(
    policy: RetryPolicy,
    operation: &str,
    mut attempt: F,
    confirm: P,
) -> RetryOutcome<T>
where
    T: Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    P: Fn(&T) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;
    loop {
        attempts += 1;
        let value = attempt().await;
        if confirm(&value) {
            if attempts > 1 {
                debug!(operation, attempts, "operation confirmed after retry");
            }
            return RetryOutcome::Confirmed { value, attempts };
        }
        if attempts >= max_attempts {
            warn!(operation, attempts, last = ?value, "operation not confirmed, giving up");
            return RetryOutcome::Exhausted { last: value, attempts };
        }
        debug!(
            operation,
            attempt = attempts,
            max_attempts,
            delay_ms = policy.delay.as_millis(),
            observed = ?value,
            "operation not confirmed, will retry"
        );
        tokio::time::sleep(policy.delay).await;
    }
}
