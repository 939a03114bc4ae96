//! # Backoff policy for `retry_backoff`.
//!
//! [`BackoffPolicy`] bounds how many times a failed sequence is resubscribed
//! and how long to wait before each attempt:
//!
//! - [`BackoffPolicy::max_retries`] the resubscription budget;
//! - [`BackoffPolicy::first`] the delay before the first retry;
//! - [`BackoffPolicy::factor`] the multiplicative growth per attempt;
//! - [`BackoffPolicy::max`] the cap applied before jitter.
//!
//! The delay for attempt `n` (0-indexed) is `first × factor^n`, clamped to
//! `max`, then jittered. The base is derived from `n` alone, so jitter never
//! compounds across attempts.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use sluice::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     max_retries: 5,
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! assert_eq!(backoff.next(10), Duration::from_secs(1));
//! ```

use std::time::Duration;

use super::JitterPolicy;

/// Resubscription schedule for `retry_backoff`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Resubscriptions allowed before `RetryExhausted` is emitted.
    pub max_retries: u32,
    /// Delay before the first resubscription.
    pub first: Duration,
    /// Upper bound on the un-jittered delay.
    pub max: Duration,
    /// Growth factor per attempt (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to every delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// - `max_retries = 3`
    /// - `first = 100ms`, `factor = 2.0`, `max = 10s`
    /// - `jitter = Proportional(0.5)`
    fn default() -> Self {
        Self {
            max_retries: 3,
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: JitterPolicy::Proportional(0.5),
        }
    }
}

impl BackoffPolicy {
    /// Fixed delay between attempts, no jitter.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Delay to wait before resubscription number `attempt` (0-indexed).
    ///
    /// Non-finite or negative intermediate values clamp to [`max`](Self::max).
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 10,
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn grows_exponentially_until_capped() {
        let policy = exact(100, 1_000, 2.0);
        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(2), Duration::from_millis(400));
        assert_eq!(policy.next(4), Duration::from_millis(1_000));
        assert_eq!(policy.next(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn first_above_max_is_clamped() {
        let policy = exact(5_000, 1_000, 2.0);
        assert_eq!(policy.next(0), Duration::from_millis(1_000));
    }

    #[test]
    fn fixed_is_constant() {
        let policy = BackoffPolicy::fixed(2, Duration::from_millis(20));
        for attempt in 0..5 {
            assert_eq!(policy.next(attempt), Duration::from_millis(20));
        }
    }

    #[test]
    fn jitter_is_applied_to_the_capped_base() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Full,
            ..exact(100, 1_000, 2.0)
        };
        for attempt in 0..20 {
            assert!(policy.next(attempt) <= Duration::from_millis(1_000));
        }
    }
}
