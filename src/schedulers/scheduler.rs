//! # Scheduler: a named execution context backed by an owned tokio runtime.
//!
//! | Kind | Runtime | Job placement |
//! |------|---------|---------------|
//! | `single` | multi-thread, 1 worker thread | on the runtime thread |
//! | `parallel` | multi-thread, `Config::parallelism()` threads | on runtime threads |
//! | `boundedElastic` | multi-thread, 1 driver thread, blocking pool capped at `Config::elastic_max_threads()` | blocking pool |
//!
//! The three shared instances (`Scheduler::single()` etc.) live for the whole
//! process. Private instances come from [`Scheduler::builder`] and are torn
//! down by [`Scheduler::dispose`] or when the last handle (including every
//! worker created from it) is dropped.

use std::sync::atomic::{AtomicUsize, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::SchedulerError;
use crate::protocol::{Disposable, lock};

use super::context::ExecutionContext;
use super::worker::Worker;
use super::{BlockingDetector, SchedulerBuilder, SchedulerKind};

static SINGLE: OnceLock<Scheduler> = OnceLock::new();
static PARALLEL: OnceLock<Scheduler> = OnceLock::new();
static BOUNDED_ELASTIC: OnceLock<Scheduler> = OnceLock::new();

/// State shared by a scheduler and its workers.
pub(crate) struct SchedulerShared {
    pub(crate) kind: SchedulerKind,
    pub(crate) handle: Handle,
    pub(crate) token: CancellationToken,
    pub(crate) active: Arc<AtomicUsize>,
    pub(crate) context: ExecutionContext,
    runtime: Mutex<Option<Runtime>>,
    shared: bool,
}

impl SchedulerShared {
    fn shutdown(&self) {
        self.token.cancel();
        if let Some(rt) = lock(&self.runtime).take() {
            rt.shutdown_background();
            tracing::debug!(scheduler = self.kind.as_str(), "scheduler disposed");
        }
    }
}

impl Drop for SchedulerShared {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Named execution context.
///
/// Cheap to clone; clones refer to the same runtime.
///
/// # Example
/// ```no_run
/// use sluice::{Flow, Scheduler};
///
/// Flow::range(1, 3)
///     .subscribe_on(&Scheduler::bounded_elastic())
///     .publish_on(&Scheduler::parallel())
///     .subscribe_next(|n| println!("{n}"));
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerShared>,
}

impl Scheduler {
    /// Shared `single` scheduler.
    ///
    /// # Panics
    /// Panics if the backing runtime cannot be started.
    pub fn single() -> Scheduler {
        Self::named(SchedulerKind::Single)
    }

    /// Shared `parallel` scheduler.
    ///
    /// # Panics
    /// Panics if the backing runtime cannot be started.
    pub fn parallel() -> Scheduler {
        Self::named(SchedulerKind::Parallel)
    }

    /// Shared `boundedElastic` scheduler.
    ///
    /// # Panics
    /// Panics if the backing runtime cannot be started.
    pub fn bounded_elastic() -> Scheduler {
        Self::named(SchedulerKind::BoundedElastic)
    }

    /// Shared scheduler selected by kind.
    ///
    /// # Panics
    /// Panics if the backing runtime cannot be started; use
    /// [`Scheduler::try_named`] to handle that case.
    pub fn named(kind: SchedulerKind) -> Scheduler {
        match Self::try_named(kind) {
            Ok(s) => s,
            Err(err) => panic!("{err}"),
        }
    }

    /// Shared scheduler selected by kind, reporting runtime start failures.
    pub fn try_named(kind: SchedulerKind) -> Result<Scheduler, SchedulerError> {
        let cell = match kind {
            SchedulerKind::Single => &SINGLE,
            SchedulerKind::Parallel => &PARALLEL,
            SchedulerKind::BoundedElastic => &BOUNDED_ELASTIC,
        };
        if let Some(s) = cell.get() {
            return Ok(s.clone());
        }
        let built = Self::start(kind, Config::global(), None, true)?;
        // A concurrent initializer may have won; its instance is kept.
        Ok(cell.get_or_init(|| built).clone())
    }

    /// Builder for a private scheduler instance.
    pub fn builder(kind: SchedulerKind) -> SchedulerBuilder {
        SchedulerBuilder::new(kind)
    }

    pub(crate) fn start(
        kind: SchedulerKind,
        cfg: &Config,
        detector: Option<BlockingDetector>,
        shared: bool,
    ) -> Result<Scheduler, SchedulerError> {
        let name = kind.as_str();
        let seq = Arc::new(AtomicU32::new(0));
        let mut builder = Builder::new_multi_thread();
        builder
            .enable_time()
            .thread_name_fn(move || format!("{name}-{}", seq.fetch_add(1, Ordering::Relaxed) + 1));
        match kind {
            SchedulerKind::Single => {
                builder.worker_threads(1);
            }
            SchedulerKind::Parallel => {
                builder.worker_threads(cfg.parallelism());
            }
            SchedulerKind::BoundedElastic => {
                builder
                    .worker_threads(1)
                    .max_blocking_threads(cfg.elastic_max_threads())
                    .thread_keep_alive(cfg.elastic_keep_alive);
            }
        }
        let runtime = builder.build().map_err(|source| SchedulerError::Build {
            name: name.to_string(),
            source,
        })?;
        tracing::debug!(scheduler = name, shared, "scheduler started");

        Ok(Scheduler {
            inner: Arc::new(SchedulerShared {
                kind,
                handle: runtime.handle().clone(),
                token: CancellationToken::new(),
                active: Arc::new(AtomicUsize::new(0)),
                context: ExecutionContext { kind, detector },
                runtime: Mutex::new(Some(runtime)),
                shared,
            }),
        })
    }

    /// Which kind of context this is.
    pub fn kind(&self) -> SchedulerKind {
        self.inner.kind
    }

    /// Stable name (`single`, `boundedElastic`, `parallel`).
    pub fn name(&self) -> &'static str {
        self.inner.kind.as_str()
    }

    /// Acquires a new FIFO lane.
    pub fn create_worker(&self) -> Worker {
        Worker::spawn(Arc::clone(&self.inner))
    }

    /// Runs `job` once on a fresh worker.
    ///
    /// Disposing the returned handle before the job starts drops it.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) -> Disposable {
        let worker = self.create_worker();
        worker.schedule(job);
        worker.as_disposable()
    }

    /// Number of workers whose drain task is still running.
    pub fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Stops every worker and shuts the runtime down.
    ///
    /// Ignored (with a warning) on the shared instances.
    pub fn dispose(&self) {
        if self.inner.shared {
            tracing::warn!(
                scheduler = self.name(),
                "dispose() ignored on a shared scheduler"
            );
            return;
        }
        self.inner.shutdown();
    }

    /// True once [`dispose`](Self::dispose) ran.
    pub fn is_disposed(&self) -> bool {
        self.inner.token.is_cancelled()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name())
            .field("active_workers", &self.active_workers())
            .finish()
    }
}
