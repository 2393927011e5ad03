//! Retry policy for delivering results back to the source node
use std::time::Duration;
use tokio_retry::{Action, Condition, Retry, RetryIf};

/// Retries an operation a bounded number of times, sleeping a random
/// time between attempts
///
/// The sleep after attempt `k` (starting at 1) is uniformly distributed in
/// `[0, k * base]`, so the backoff grows linearly with the attempt number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 10,
            base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// The time to sleep after the given (failed) attempt, saturating at
    /// [`Duration::MAX`]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.base.as_secs_f64() * rand::random::<f64>() * f64::from(attempt);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// The sleeps between consecutive attempts
    pub fn delays(&self) -> Delays {
        Delays {
            policy: self.clone(),
            attempt: 1,
        }
    }

    /// Run `action` until it succeeds or the attempts are exhausted,
    /// returning the last error in the latter case
    pub async fn run<A: Action>(&self, action: A) -> Result<A::Item, A::Error> {
        Retry::spawn(self.delays(), action).await
    }

    /// Like [`RetryPolicy::run`], but stop at the first error for which
    /// `condition` returns false
    pub async fn run_if<A, C>(&self, action: A, condition: C) -> Result<A::Item, A::Error>
    where
        A: Action,
        C: Condition<A::Error>,
    {
        RetryIf::spawn(self.delays(), action, condition).await
    }
}

/// Iterator over the backoff sleeps of a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct Delays {
    policy: RetryPolicy,
    attempt: u32,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.backoff(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}
