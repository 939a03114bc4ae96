//! # Engine configuration.
//!
//! Provides [`Config`], centralized settings for schedulers and buffering operators.
//!
//! Config is used in two ways:
//! 1. **Shared schedulers**: `Scheduler::single()`, `Scheduler::parallel()` and
//!    `Scheduler::bounded_elastic()` are built from [`Config::global`].
//! 2. **Private schedulers**: `Scheduler::builder(kind).config(cfg)`.
//!
//! ## Sentinel values
//! - `parallelism = 0` → number of logical CPUs
//! - `elastic_max_threads = 0` → ten threads per logical CPU
//! - `verify_timeout = 0s` → `StepVerifier::verify()` waits without deadline

use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

static GLOBAL: OnceLock<Config> = OnceLock::new();

/// Global configuration for the engine.
///
/// ## Field semantics
/// - `parallelism`: worker threads of the `parallel` scheduler (`0` = CPU count)
/// - `elastic_max_threads`: cap on `boundedElastic` threads (`0` = 10 × CPU count)
/// - `elastic_keep_alive`: idle time before an elastic thread is released
/// - `flat_map_concurrency`: default number of inner sequences subscribed at once
/// - `prefetch`: items requested ahead by `publish_on` and `zip`
/// - `verify_timeout`: default deadline for `StepVerifier::verify()` (`0s` = none)
#[derive(Clone, Debug)]
pub struct Config {
    /// Worker threads of the fixed `parallel` pool.
    pub parallelism: usize,

    /// Maximum number of threads the `boundedElastic` pool grows to.
    ///
    /// Work beyond this cap waits in the runtime's queue until a thread frees up.
    pub elastic_max_threads: usize,

    /// How long an idle `boundedElastic` thread is kept before it exits.
    pub elastic_keep_alive: Duration,

    /// Default concurrency for `flat_map`, `flat_map_sequential` and `merge`.
    pub flat_map_concurrency: usize,

    /// Items requested ahead of downstream demand by queueing operators.
    pub prefetch: usize,

    /// Default verification deadline.
    pub verify_timeout: Duration,
}

impl Config {
    /// Returns the process-wide configuration.
    ///
    /// The first call freezes the value: either the one passed to
    /// [`Config::install`] earlier, or [`Config::default`].
    pub fn global() -> &'static Config {
        GLOBAL.get_or_init(Config::default)
    }

    /// Installs `self` as the process-wide configuration.
    ///
    /// Must run before any shared scheduler is touched. Returns the rejected
    /// config if a global value is already frozen.
    pub fn install(self) -> Result<(), Config> {
        GLOBAL.set(self)
    }

    /// Returns the `parallel` pool size, resolving the `0` sentinel.
    #[inline]
    pub fn parallelism(&self) -> usize {
        if self.parallelism == 0 {
            available_cpus()
        } else {
            self.parallelism
        }
    }

    /// Returns the `boundedElastic` thread cap, resolving the `0` sentinel.
    #[inline]
    pub fn elastic_max_threads(&self) -> usize {
        if self.elastic_max_threads == 0 {
            available_cpus() * 10
        } else {
            self.elastic_max_threads
        }
    }

    /// Returns the default verification deadline as an `Option`.
    ///
    /// - `None` → verify waits for the expectation chain indefinitely
    /// - `Some(d)` → verify fails once `d` has elapsed
    #[inline]
    pub fn default_verify_timeout(&self) -> Option<Duration> {
        if self.verify_timeout == Duration::ZERO {
            None
        } else {
            Some(self.verify_timeout)
        }
    }

    /// Returns the flat-map concurrency clamped to a minimum of 1.
    #[inline]
    pub fn flat_map_concurrency_clamped(&self) -> usize {
        self.flat_map_concurrency.max(1)
    }

    /// Returns the prefetch clamped to a minimum of 1.
    #[inline]
    pub fn prefetch_clamped(&self) -> usize {
        self.prefetch.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `parallelism = 0` (CPU count)
    /// - `elastic_max_threads = 0` (10 × CPU count)
    /// - `elastic_keep_alive = 60s`
    /// - `flat_map_concurrency = 256`
    /// - `prefetch = 32`
    /// - `verify_timeout = 0s` (no deadline)
    fn default() -> Self {
        Self {
            parallelism: 0,
            elastic_max_threads: 0,
            elastic_keep_alive: Duration::from_secs(60),
            flat_map_concurrency: 256,
            prefetch: 32,
            verify_timeout: Duration::ZERO,
        }
    }
}

fn available_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
