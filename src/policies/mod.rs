//! Retry policies.
//!
//! - [`BackoffPolicy`] how many resubscriptions `retry_backoff` performs and
//!   how long it waits before each one
//! - [`JitterPolicy`] randomization applied to each wait
//!
//! ```text
//! on_error ──► attempt < max_retries ? ──yes──► sleep(backoff.next(attempt)) on parallel ──► resubscribe
//!                      └──no──► RetryExhausted { attempts, last }
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
