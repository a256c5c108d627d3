//! Retry policy with deterministic capped exponential backoff.
//!
//! The delay before the retry that follows failed attempt `n` (1-based) is
//! `min(base * factor^(n-1), cap)`. With base 1s, factor 2 and cap 8s the
//! delays are 1, 2, 4, 8, 8, ... Jitter is opt-in.

use crate::errors::StageError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Jitter applied on top of the computed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Use the exact computed delay.
    #[default]
    None,
    /// Uniform random delay in `[0, delay]`.
    Full,
}

/// Per-stage retry budget and backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied per additional failed attempt.
    pub factor: u32,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
            factor: 2,
            jitter: JitterStrategy::None,
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` attempts with default backoff.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// A single attempt with no retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff factor.
    #[must_use]
    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic delay before the retry following failed attempt `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = u64::from(self.factor).saturating_pow(exponent);
        let delay = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Delay with the configured jitter applied.
    #[must_use]
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                if ms == 0 {
                    delay
                } else {
                    Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
                }
            }
        }
    }

    /// Returns the deterministic delay schedule for every retry the budget allows.
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|n| self.delay_for(n)).collect()
    }

    /// Decides what to do after attempt `attempt` failed with `error`.
    #[must_use]
    pub fn decide(&self, attempt: u32, error: &StageError) -> RetryDecision {
        self.decide_for(attempt, error.is_retryable())
    }

    /// Decides what to do after a failed attempt whose retryability is known.
    #[must_use]
    pub fn decide_for(&self, attempt: u32, retryable: bool) -> RetryDecision {
        if !retryable {
            RetryDecision::NotRetryable
        } else if attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry(self.jittered_delay_for(attempt))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.jitter, JitterStrategy::None);
        assert!(policy.schedule().is_empty());
    }

    #[test]
    fn test_capped_exponential_schedule() {
        let policy = RetryPolicy::new(6)
            .with_base_delay_ms(1000)
            .with_max_delay_ms(8000)
            .with_factor(2);

        assert_eq!(policy.schedule(), secs(&[1, 2, 4, 8, 8]));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(100).with_max_delay_ms(u64::MAX);
        assert_eq!(policy.delay_for(90), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_factor_one_is_constant() {
        let policy = RetryPolicy::new(4).with_base_delay_ms(250).with_factor(1);
        assert_eq!(
            policy.schedule(),
            vec![Duration::from_millis(250); 3]
        );
    }

    #[test]
    fn test_full_jitter_bounded() {
        let policy = RetryPolicy::new(3).with_jitter(JitterStrategy::Full);
        for _ in 0..20 {
            assert!(policy.jittered_delay_for(2) <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_decide() {
        let policy = RetryPolicy::new(3);
        let transient = StageError::transient("503");

        assert_eq!(policy.decide(1, &transient), RetryDecision::Retry(Duration::from_secs(1)));
        assert_eq!(policy.decide(2, &transient), RetryDecision::Retry(Duration::from_secs(2)));
        assert_eq!(policy.decide(3, &transient), RetryDecision::GiveUp);
        assert_eq!(
            policy.decide(1, &StageError::permanent("403")),
            RetryDecision::NotRetryable
        );
        assert_eq!(
            policy.decide(1, &StageError::TimedOut { timeout_ms: 10 }),
            RetryDecision::Retry(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_partial_yaml() {
        let policy: RetryPolicy = serde_yaml::from_str("max_attempts: 3\njitter: full\n").unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.jitter, JitterStrategy::Full);
    }
}
