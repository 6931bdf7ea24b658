//! Capped exponential backoff for failed webhook dispatches.
//!
//! One policy governs every delivery task: a fixed attempt ceiling, a base
//! delay doubling per attempt up to a cap, and jitter to spread retries of
//! unrelated tasks apart. Rate-limited endpoints that answer with a
//! Retry-After value override the computed delay.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy for webhook dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of dispatch attempts, including the first. Reaching
    /// the ceiling leaves the task in the terminal failed state.
    pub max_attempts: u32,

    /// Base delay for the exponential schedule.
    pub base_delay: Duration,

    /// Cap applied to every computed delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) randomizing each delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.25,
        }
    }
}

/// Context of one failed dispatch, for the retry decision.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed (1-based).
    pub attempt_number: u32,
    /// The failure.
    pub error: DeliveryError,
    /// When the attempt failed.
    pub failed_at: DateTime<Utc>,
    /// Policy to apply.
    pub policy: RetryPolicy,
}

/// Result of the retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule the dispatch.
    Retry {
        /// When the next attempt becomes due.
        next_attempt_at: DateTime<Utc>,
    },
    /// Stop: the task is permanently failed.
    GiveUp {
        /// Why no further attempt is made.
        reason: String,
    },
}

impl RetryContext {
    /// Creates a retry context for a failed dispatch.
    pub fn new(
        attempt_number: u32,
        error: DeliveryError,
        failed_at: DateTime<Utc>,
        policy: RetryPolicy,
    ) -> Self {
        Self { attempt_number, error, failed_at, policy }
    }

    /// Decides whether and when to dispatch again.
    ///
    /// Gives up once the ceiling is reached or the error is not worth
    /// retrying; otherwise schedules the next attempt on the backoff
    /// curve.
    pub fn decide(&self) -> RetryDecision {
        if self.attempt_number >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("retry ceiling ({}) reached", self.policy.max_attempts),
            };
        }

        if !self.error.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {}", self.error),
            };
        }

        let delay = self.delay();
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp { reason: "retry delay out of range".to_string() };
        };

        RetryDecision::Retry { next_attempt_at: self.failed_at + chrono_delay }
    }

    /// Delay until the next attempt.
    ///
    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`, jittered. A
    /// Retry-After value from the endpoint wins over the computed delay.
    pub fn delay(&self) -> Duration {
        if let Some(retry_after) = self.error.retry_after_seconds() {
            return Duration::from_secs(retry_after);
        }

        let exponent = self.attempt_number.saturating_sub(1).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let exponential = self.policy.base_delay.saturating_mul(multiplier);
        let capped = std::cmp::min(exponential, self.policy.max_delay);

        std::cmp::min(apply_jitter(capped, self.policy.jitter_factor), self.policy.max_delay)
    }
}

/// Randomizes a delay by up to `jitter_factor` in either direction.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped = jitter_factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();
    let range = duration.as_secs_f64() * clamped;
    let offset = rng.random_range(-range..=range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter_policy() -> RetryPolicy {
        RetryPolicy { jitter_factor: 0.0, ..Default::default() }
    }

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let base_time = Utc::now();
        let delays: Vec<Duration> = (1..=5)
            .map(|attempt| {
                RetryContext::new(
                    attempt,
                    DeliveryError::timeout(30),
                    base_time,
                    no_jitter_policy(),
                )
                .delay()
            })
            .collect();

        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        assert_eq!(delays[3], Duration::from_secs(8));
        assert_eq!(delays[4], Duration::from_secs(16));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            max_attempts: 20,
            ..Default::default()
        };
        let context =
            RetryContext::new(15, DeliveryError::timeout(30), Utc::now(), policy);

        assert_eq!(context.delay(), Duration::from_secs(60));
    }

    #[test]
    fn ceiling_stops_retries() {
        let policy = RetryPolicy { max_attempts: 3, ..Default::default() };
        let context =
            RetryContext::new(3, DeliveryError::timeout(30), Utc::now(), policy);

        match context.decide() {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("retry ceiling")),
            RetryDecision::Retry { .. } => panic!("must not retry at the ceiling"),
        }
    }

    #[test]
    fn non_retryable_errors_give_up_immediately() {
        let context = RetryContext::new(
            1,
            DeliveryError::client_error(404, "not found"),
            Utc::now(),
            RetryPolicy::default(),
        );

        match context.decide() {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("non-retryable")),
            RetryDecision::Retry { .. } => panic!("client errors must not retry"),
        }
    }

    #[test]
    fn retry_after_overrides_backoff() {
        let context = RetryContext::new(
            1,
            DeliveryError::rate_limited(120),
            Utc::now(),
            no_jitter_policy(),
        );

        assert_eq!(context.delay(), Duration::from_secs(120));
    }

    #[test]
    fn retry_schedules_relative_to_failure_time() {
        let failed_at = Utc::now();
        let context = RetryContext::new(
            2,
            DeliveryError::server_error(503, "unavailable"),
            failed_at,
            no_jitter_policy(),
        );

        match context.decide() {
            RetryDecision::Retry { next_attempt_at } => {
                assert_eq!(next_attempt_at, failed_at + chrono::Duration::seconds(2));
            },
            RetryDecision::GiveUp { .. } => panic!("second attempt should retry"),
        }
    }

    #[test]
    fn jitter_varies_delay_within_bounds() {
        let base = Duration::from_secs(10);
        let mut seen = std::collections::HashSet::new();

        for _ in 0..20 {
            let jittered = apply_jitter(base, 0.5);
            assert!(jittered >= Duration::from_secs(5), "too small: {jittered:?}");
            assert!(jittered <= Duration::from_secs(15), "too large: {jittered:?}");
            seen.insert(jittered.as_millis());
        }

        assert!(seen.len() > 1, "jitter should create variation");
    }
}
