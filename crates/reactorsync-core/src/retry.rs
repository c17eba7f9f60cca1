//! ---
//! rs_section: "01-core-functionality"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Bounded exponential backoff for publish and persist calls."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reactorsync_common::RetryConfig;
use reactorsync_msg::MessagingError;
use reactorsync_persistence::StoreError;
use tokio::time::sleep;
use tracing::{error, warn};

/// Errors that say whether repeating the call can help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for MessagingError {
    fn is_transient(&self) -> bool {
        matches!(self, MessagingError::Unavailable(_) | MessagingError::Io(_))
    }
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

/// Policy parameters controlling retry attempts and scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first call.
    pub max_attempts: usize,
    /// Delay before the second attempt; doubles per attempt.
    pub base_delay: Duration,
    /// Maximum jitter added to each delay.
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay_ms, config.jitter_ms)
    }

    /// Delay after the given failed attempt (1-indexed).
    pub fn backoff_delay(&self, attempt: usize, rng: &mut StdRng) -> Duration {
        let exponent = (attempt.saturating_sub(1) as u32).min(8);
        let base = self.base_delay.mul_f64(2u32.pow(exponent) as f64);
        if self.jitter.is_zero() {
            base
        } else {
            let jitter_ms = rng.gen_range(0..=self.jitter.as_millis().max(1)) as u64;
            base + Duration::from_millis(jitter_ms)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50), Duration::from_millis(10))
    }
}

/// Final failure of a retried call.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: usize,
    pub last_error: E,
}

/// Runs fallible calls under a [`RetryPolicy`].
#[derive(Debug)]
pub struct Retrier {
    policy: RetryPolicy,
    rng: StdRng,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            rng: StdRng::seed_from_u64(0xDEAD_BEEF),
        }
    }

    /// Seed the jitter RNG for deterministic testing.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Call `operation` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, E, F>(
        &mut self,
        operation_name: &'static str,
        reactor_id: u32,
        mut operation: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: Transient + std::fmt::Display,
        F: FnMut(usize) -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => {
                    warn!(operation = operation_name, reactor_id, attempt, error = %err, "permanent failure");
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                Err(err) => {
                    if attempt >= self.policy.max_attempts {
                        error!(
                            operation = operation_name,
                            reactor_id,
                            attempts = attempt,
                            error = %err,
                            "exhausted retry attempts"
                        );
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }
                    warn!(operation = operation_name, reactor_id, attempt, error = %err, "attempt failed, retrying");
                    let delay = self.policy.backoff_delay(attempt, &mut self.rng);
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(max_attempts: usize) -> Retrier {
        Retrier::new(RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::ZERO,
        ))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(10), Duration::ZERO);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(policy.backoff_delay(1, &mut rng), Duration::from_millis(10));
        assert_eq!(policy.backoff_delay(3, &mut rng), Duration::from_millis(40));
        assert_eq!(policy.backoff_delay(20, &mut rng), Duration::from_millis(2560));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn jitter_stays_bounded() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(5));
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..100 {
            let delay = policy.backoff_delay(1, &mut rng);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let mut retrier = quick(3);
        let result = retrier
            .run("publish", 1, |attempt| {
                if attempt < 3 {
                    Err(MessagingError::Unavailable("down".into()))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut retrier = quick(2);
        let mut calls = 0;
        let result: Result<(), _> = retrier
            .run("persist", 1, |_| {
                calls += 1;
                Err(StoreError::Unavailable("down".into()))
            })
            .await;
        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 2);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let mut retrier = quick(5);
        let mut calls = 0;
        let result: Result<(), _> = retrier
            .run("persist", 9999, |_| {
                calls += 1;
                Err(StoreError::UnknownReactor(9999))
            })
            .await;
        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls, 1);
    }
}
