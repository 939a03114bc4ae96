//! Helpers for serializing concurrent signal paths.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::FlowError;

/// Locks `mutex`, ignoring poisoning.
///
/// Stage state stays consistent across a panicking callback because callbacks
/// never run while the lock is held.
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs a user callback, turning a panic into [`FlowError::Panicked`].
#[inline]
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, FlowError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(FlowError::from_panic)
}

/// Work-in-progress counter: only one thread runs a drain loop at a time,
/// concurrent callers are folded into the running loop as extra passes.
#[derive(Debug, Default)]
pub(crate) struct WorkInProgress {
    wip: AtomicUsize,
}

impl WorkInProgress {
    pub(crate) const fn new() -> Self {
        Self {
            wip: AtomicUsize::new(0),
        }
    }

    /// Runs `pass` until no other caller asked for another pass meanwhile.
    ///
    /// Returns immediately if another thread is already draining; that
    /// thread will run one more pass on our behalf.
    pub(crate) fn drain(&self, pass: impl FnMut()) {
        if self.try_enter() {
            self.run_entered(pass);
        }
    }

    /// Registers one more pass; true if the caller became the drainer and
    /// must follow up with [`run_entered`](Self::run_entered), possibly on
    /// another thread.
    pub(crate) fn try_enter(&self) -> bool {
        self.wip.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Drain loop for a caller that won [`try_enter`](Self::try_enter).
    pub(crate) fn run_entered(&self, mut pass: impl FnMut()) {
        let mut missed = 1;
        loop {
            pass();
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn reentrant_drain_runs_an_extra_pass_instead_of_recursing() {
        let wip = Arc::new(WorkInProgress::new());
        let passes = AtomicUsize::new(0);
        let inner = Arc::clone(&wip);
        wip.drain(|| {
            let n = passes.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                // Re-entry must not run synchronously.
                inner.drain(|| panic!("nested drain ran"));
            }
        });
        assert_eq!(passes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn guarded_catches_panics() {
        let ok = guarded(|| 7);
        assert_eq!(ok, Ok(7));
        let err = guarded(|| -> u8 { panic!("bad callback") });
        assert_eq!(err, Err(FlowError::Panicked { message: "bad callback".into() }));
    }

    #[test]
    fn poisoned_locks_stay_usable() {
        let m = Arc::new(Mutex::new(1));
        let m2 = Arc::clone(&m);
        let _ = thread::spawn(move || {
            let _g = m2.lock().unwrap();
            panic!("poison");
        })
        .join();
        *lock(&m) += 1;
        assert_eq!(*lock(&m), 2);
    }
}
