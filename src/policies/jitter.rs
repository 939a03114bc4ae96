//! # Jitter for resubscription delays.
//!
//! [`JitterPolicy`] randomizes a backoff delay so that many sequences failing
//! at once do not resubscribe in lockstep.
//!
//! - [`JitterPolicy::None`]: exact delay
//! - [`JitterPolicy::Full`]: random in `[0, delay]`
//! - [`JitterPolicy::Equal`]: `delay/2 + random[0, delay/2]`
//! - [`JitterPolicy::Proportional`]: `delay ± delay × factor`

use rand::Rng;
use std::time::Duration;

/// Randomization applied to each computed backoff delay.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum JitterPolicy {
    /// Use the computed delay unchanged.
    #[default]
    None,

    /// Random delay in `[0, delay]`.
    Full,

    /// Half the delay, plus a random share of the other half.
    Equal,

    /// Random delay in `[delay × (1 - f), delay × (1 + f)]`, with `f`
    /// clamped to `[0, 1]`.
    Proportional(f64),
}

impl JitterPolicy {
    /// Applies jitter to `delay`.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        match *self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                let extra = if half == 0 { 0 } else { rng.random_range(0..=half) };
                Duration::from_millis(half + extra)
            }
            JitterPolicy::Proportional(factor) => {
                let factor = if factor.is_finite() { factor.clamp(0.0, 1.0) } else { 0.0 };
                let spread = (ms as f64 * factor) as u64;
                if spread == 0 {
                    return delay;
                }
                let low = ms.saturating_sub(spread);
                let high = ms.saturating_add(spread);
                Duration::from_millis(rng.random_range(low..=high))
            }
        }
    }
}
