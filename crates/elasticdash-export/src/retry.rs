//! Retry scheduling for failed queue jobs.
//!
//! A failed job is either rescheduled or given up on. The delay doubles with
//! every attempt, capped at `max_delay`, with random jitter so jobs that
//! failed together do not come back together. Non-retryable errors give up
//! immediately regardless of attempts left.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ExportError;

/// Retry policy applied to every job kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of executions, including the first one.
    pub max_attempts: u32,

    /// Base delay for backoff calculation.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Jitter fraction in `[0.0, 1.0]`.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(900),
            jitter_factor: 0.25,
        }
    }
}

/// Everything needed to decide what happens to a failed job.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed (1-based).
    pub attempt_number: u32,
    /// Failure of that attempt.
    pub error: ExportError,
    /// When the attempt failed.
    pub failed_at: DateTime<Utc>,
    /// Policy to apply.
    pub policy: RetryPolicy,
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule the job.
    Retry {
        /// When the job becomes claimable again
        next_attempt_at: DateTime<Utc>,
    },
    /// Fail the job permanently.
    GiveUp {
        /// Why the job will not be retried
        reason: String,
    },
}

impl RetryContext {
    /// Creates a new retry context for a failed attempt.
    pub fn new(
        attempt_number: u32,
        error: ExportError,
        failed_at: DateTime<Utc>,
        policy: RetryPolicy,
    ) -> Self {
        Self { attempt_number, error, failed_at, policy }
    }

    /// Decides whether and when the job runs again.
    ///
    /// Rate-limited failures wait for the destination's `Retry-After` instead
    /// of the computed backoff.
    pub fn decide_retry(&self) -> RetryDecision {
        if !self.error.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {}", self.error),
            };
        }

        if self.attempt_number >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.policy.max_attempts),
            };
        }

        let delay = self.calculate_delay();
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp {
                reason: "retry delay duration out of range".to_string(),
            };
        };

        RetryDecision::Retry { next_attempt_at: self.failed_at + chrono_delay }
    }

    fn calculate_delay(&self) -> Duration {
        if let Some(retry_after_seconds) = self.error.retry_after_seconds() {
            return Duration::from_secs(retry_after_seconds);
        }

        let steps = self.attempt_number.saturating_sub(1).min(20);
        let capped =
            self.policy.base_delay.saturating_mul(2_u32.pow(steps)).min(self.policy.max_delay);
        apply_jitter(capped, self.policy.jitter_factor).min(self.policy.max_delay)
    }
}

/// Randomizes `duration` by up to `±jitter_factor` of its length.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let jitter_range = duration.as_secs_f64() * jitter_factor.clamp(0.0, 1.0);
    let offset = rand::rng().random_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn without_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter_factor: 0.0,
            base_delay: Duration::from_secs(2),
            ..RetryPolicy::default()
        }
    }

    fn delays(policy: &RetryPolicy, attempts: std::ops::RangeInclusive<u32>) -> Vec<Duration> {
        attempts
            .map(|attempt| {
                RetryContext::new(attempt, ExportError::timeout(30), Utc::now(), policy.clone())
                    .calculate_delay()
            })
            .collect()
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(delays(&without_jitter(), 1..=4), [2, 4, 8, 16].map(Duration::from_secs));
    }

    #[test]
    fn large_attempt_numbers_do_not_overflow() {
        let policy = RetryPolicy { max_delay: Duration::MAX, ..without_jitter() };

        assert!(delays(&policy, 30..=32).windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = RetryPolicy { max_attempts: 3, ..RetryPolicy::default() };
        let context = RetryContext::new(3, ExportError::network("reset"), Utc::now(), policy);

        match context.decide_retry() {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("maximum attempts")),
            RetryDecision::Retry { .. } => unreachable!("retried past max attempts"),
        }
    }

    #[test]
    fn gives_up_on_first_non_retryable_failure() {
        let context = RetryContext::new(
            1,
            ExportError::configuration("unrecognized job kind: nope"),
            Utc::now(),
            RetryPolicy::default(),
        );

        match context.decide_retry() {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("non-retryable")),
            RetryDecision::Retry { .. } => unreachable!("retried a configuration error"),
        }
    }

    #[test]
    fn rate_limit_waits_for_retry_after() {
        let failed_at = Utc::now();
        let context = RetryContext::new(
            1,
            ExportError::rate_limited(120),
            failed_at,
            RetryPolicy::default(),
        );

        assert_eq!(
            context.decide_retry(),
            RetryDecision::Retry { next_attempt_at: failed_at + chrono::Duration::seconds(120) }
        );
    }

    #[test]
    fn max_delay_caps_backoff() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(60),
            ..without_jitter()
        };

        assert!(delays(&policy, 8..=12).iter().all(|delay| *delay == Duration::from_secs(60)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        let mut seen = std::collections::HashSet::new();

        for _ in 0..20 {
            let jittered = apply_jitter(base, 0.5);
            assert!(jittered >= Duration::from_secs(5) && jittered <= Duration::from_secs(15));
            seen.insert(jittered.as_millis());
        }

        assert!(seen.len() > 1);
    }
}
