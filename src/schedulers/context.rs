//! Thread-local record of the unit of work currently executing.
//!
//! A worker installs an [`ExecutionContext`] around every job it runs, so code
//! inside the job (operators, user callbacks, the blocking detector) can ask
//! which scheduler it is on.

use std::cell::RefCell;

use super::{BlockingDetector, SchedulerKind};

/// What a running job knows about where it runs.
#[derive(Clone, Debug)]
pub(crate) struct ExecutionContext {
    pub(crate) kind: SchedulerKind,
    pub(crate) detector: Option<BlockingDetector>,
}

thread_local! {
    static CURRENT: RefCell<Option<ExecutionContext>> = const { RefCell::new(None) };
}

/// Restores the previous context on drop, even if the job panicked.
struct Reset(Option<ExecutionContext>);

impl Drop for Reset {
    fn drop(&mut self) {
        let prev = self.0.take();
        CURRENT.with(|c| *c.borrow_mut() = prev);
    }
}

/// Runs `f` with `ctx` installed as the current context.
pub(crate) fn enter<R>(ctx: &ExecutionContext, f: impl FnOnce() -> R) -> R {
    let prev = CURRENT.with(|c| c.borrow_mut().replace(ctx.clone()));
    let _reset = Reset(prev);
    f()
}

/// Clone of the current context, if a job is running on this thread.
pub(crate) fn current() -> Option<ExecutionContext> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Kind of the scheduler running the calling thread's current job.
pub(crate) fn current_kind() -> Option<SchedulerKind> {
    CURRENT.with(|c| c.borrow().as_ref().map(|ctx| ctx.kind))
}

/// Name of the scheduler running the calling thread's current job.
///
/// Returns `None` outside scheduled work (e.g. on the caller's own thread).
///
/// # Example
/// ```
/// use sluice::schedulers::current_context;
///
/// assert_eq!(current_context(), None);
/// ```
pub fn current_context() -> Option<&'static str> {
    CURRENT.with(|c| c.borrow().as_ref().map(|ctx| ctx.kind.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_scoped_and_restored() {
        assert_eq!(current_context(), None);
        let outer = ExecutionContext {
            kind: SchedulerKind::Single,
            detector: None,
        };
        let inner = ExecutionContext {
            kind: SchedulerKind::Parallel,
            detector: None,
        };
        enter(&outer, || {
            assert_eq!(current_context(), Some("single"));
            enter(&inner, || assert_eq!(current_context(), Some("parallel")));
            assert_eq!(current_context(), Some("single"));
        });
        assert_eq!(current_context(), None);
    }

    #[test]
    fn context_is_restored_after_panic() {
        let ctx = ExecutionContext {
            kind: SchedulerKind::BoundedElastic,
            detector: None,
        };
        let _ = std::panic::catch_unwind(|| enter(&ctx, || panic!("job failed")));
        assert_eq!(current_context(), None);
    }
}
