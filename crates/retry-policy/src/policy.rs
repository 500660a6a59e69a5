//! Bounded exponential backoff
//!
//! Up to `max_retries` retries after the first attempt. The delay before
//! retry `n` (1-indexed) is `base_delay * 2^n`, so the default schedule is
//! 2s, 4s, 8s. Attempts are strictly sequential; the delay is a tokio sleep.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::classify::{Classify, RetryDecision, classify};

/// Retries after the initial attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unit multiplied by `2^n` for the delay before retry `n`
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry `retry` (1-indexed).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Run `attempt` until it produces a terminal outcome or the retry budget
    /// is spent, and return the last result unchanged.
    ///
    /// `attempt` receives the 1-indexed attempt number.
    pub async fn execute<T, F, Fut>(&self, mut attempt: F) -> T
    where
        T: Classify,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut retry = 0u32;
        loop {
            let result = attempt(retry + 1).await;
            let outcome = result.outcome();

            if classify(outcome) == RetryDecision::Terminate {
                debug!(attempts = retry + 1, %outcome, "attempt finished");
                return result;
            }

            if retry >= self.max_retries {
                warn!(attempts = retry + 1, %outcome, "retry budget exhausted");
                return result;
            }

            retry += 1;
            let delay = self.delay_for(retry);
            warn!(
                retry,
                delay_secs = delay.as_secs_f64(),
                %outcome,
                "transient outcome, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Outcome;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Run the policy over a scripted list of outcomes, recording when each
    /// attempt started relative to the first one.
    async fn run_script(policy: RetryPolicy, script: Vec<Outcome>) -> (Outcome, Vec<Duration>) {
        let started = Instant::now();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let last = policy
            .execute(|n| {
                let seen = seen_clone.clone();
                let outcome = script[(n - 1) as usize];
                async move {
                    seen.lock().unwrap().push(started.elapsed());
                    outcome
                }
            })
            .await;

        let offsets = seen.lock().unwrap().clone();
        (last, offsets)
    }

    /// Paused tokio time advances in whole timer ticks (1ms).
    fn assert_delay(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual - expected <= Duration::from_millis(1),
            "expected a delay of {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn default_schedule_is_two_four_eight() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_two_and_four_seconds() {
        let (last, offsets) = run_script(
            RetryPolicy::default(),
            vec![Outcome::Fault, Outcome::Status(503), Outcome::Status(200)],
        )
        .await;

        assert_eq!(last, Outcome::Status(200));
        assert_eq!(offsets.len(), 3, "exactly three attempts");
        assert_delay(offsets[1] - offsets[0], Duration::from_secs(2));
        assert_delay(offsets[2] - offsets[1], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_status_stops_after_one_attempt() {
        let (last, offsets) = run_script(
            RetryPolicy::default(),
            vec![Outcome::Status(404), Outcome::Status(200)],
        )
        .await;

        assert_eq!(last, Outcome::Status(404));
        assert_eq!(offsets, vec![Duration::ZERO], "no retry, no delay");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_last_outcome_unchanged() {
        let (last, offsets) = run_script(
            RetryPolicy::default(),
            vec![
                Outcome::Status(500),
                Outcome::Fault,
                Outcome::Status(502),
                Outcome::Status(503),
            ],
        )
        .await;

        assert_eq!(last, Outcome::Status(503));
        assert_eq!(offsets.len(), 4, "initial attempt plus three retries");
        assert_delay(offsets[3] - offsets[2], Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_single_attempt() {
        let (last, offsets) = run_script(
            RetryPolicy::new(0, DEFAULT_BASE_DELAY),
            vec![Outcome::Fault],
        )
        .await;

        assert_eq!(last, Outcome::Fault);
        assert_eq!(offsets.len(), 1);
    }
}
