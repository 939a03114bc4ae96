//! # Worker: a FIFO lane on a scheduler.
//!
//! A [`Worker`] owns an unbounded queue drained by one task on the
//! scheduler's runtime. Jobs run one at a time, in submission order, inside
//! the scheduler's [`ExecutionContext`](super::context::ExecutionContext).
//!
//! ```text
//! schedule(job) ──► [mpsc queue] ──► drain task ──► enter(ctx, job)
//! schedule_after(d, job) ──► sleep(d) ──┘              (catch_unwind)
//! dispose() ──► token.cancel() ──► drain task exits, queued jobs dropped
//! ```
//!
//! ## Lifecycle
//! - Creation increments the scheduler's active-worker gauge; the drain task
//!   decrements it when it exits.
//! - The drain task exits on `dispose()`, on scheduler disposal, or once every
//!   handle is dropped and the queue is empty.
//! - On `boundedElastic` each job is handed to the runtime's blocking pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Disposable, guarded};

use super::context::{self, ExecutionContext};
use super::scheduler::SchedulerShared;

/// Unit of work accepted by schedulers and workers.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to one FIFO lane of a scheduler.
///
/// Cloning shares the lane.
#[derive(Clone)]
pub struct Worker {
    tx: mpsc::UnboundedSender<Job>,
    token: CancellationToken,
    scheduler: Arc<SchedulerShared>,
}

/// Decrements the active-worker gauge when the drain task ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Worker {
    pub(crate) fn spawn(scheduler: Arc<SchedulerShared>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let token = scheduler.token.child_token();

        scheduler.active.fetch_add(1, Ordering::AcqRel);
        let guard = ActiveGuard(Arc::clone(&scheduler.active));

        let ctx = scheduler.context.clone();
        let elastic = scheduler.kind.is_blocking_tolerant();
        let handle = scheduler.handle.clone();
        let drain_token = token.clone();

        tracing::debug!(scheduler = scheduler.kind.as_str(), "worker started");
        scheduler.handle.spawn(async move {
            let _guard = guard;
            loop {
                tokio::select! {
                    biased;
                    _ = drain_token.cancelled() => break,
                    job = rx.recv() => {
                        let Some(job) = job else { break };
                        if elastic {
                            let ctx = ctx.clone();
                            let _ = handle.spawn_blocking(move || run(&ctx, job)).await;
                        } else {
                            run(&ctx, job);
                        }
                    }
                }
            }
            drain_token.cancel();
            tracing::debug!(scheduler = ctx.kind.as_str(), "worker released");
        });

        Self {
            tx,
            token,
            scheduler,
        }
    }

    /// Queues `job` behind every job submitted earlier.
    ///
    /// Jobs submitted after disposal are dropped.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) {
        self.submit(Box::new(job));
    }

    pub(crate) fn submit(&self, job: Job) {
        if self.token.is_cancelled() {
            return;
        }
        if self.tx.send(job).is_err() {
            tracing::debug!(
                scheduler = self.scheduler.kind.as_str(),
                "job dropped: worker already released"
            );
        }
    }

    /// Queues `job` once `delay` has elapsed.
    ///
    /// The returned handle cancels the timer; disposing the worker cancels it
    /// as well.
    pub fn schedule_after(
        &self,
        delay: Duration,
        job: impl FnOnce() + Send + 'static,
    ) -> Disposable {
        let timer = self.token.child_token();
        let tx = self.tx.clone();
        let wait = timer.clone();
        let job: Job = Box::new(job);
        self.scheduler.handle.spawn(async move {
            tokio::select! {
                _ = wait.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(job);
                }
            }
        });
        Disposable::new(Arc::new(timer))
    }

    /// Stops the lane: the running job finishes, queued jobs are dropped.
    pub fn dispose(&self) {
        self.token.cancel();
    }

    /// True once disposed or released.
    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Handle that disposes this worker.
    pub fn as_disposable(&self) -> Disposable {
        Disposable::new(Arc::new(self.token.clone()))
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("scheduler", &self.scheduler.kind.as_str())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn run(ctx: &ExecutionContext, job: Job) {
    if let Err(err) = context::enter(ctx, || guarded(job)) {
        tracing::error!(
            scheduler = ctx.kind.as_str(),
            error = %err,
            "scheduled job panicked"
        );
    }
}
