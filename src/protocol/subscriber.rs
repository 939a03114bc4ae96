//! # Subscriber trait and the closure-backed terminal subscriber.
//!
//! [`Subscriber`] is the extension point every operator stage and terminal
//! consumer implements. [`LambdaSubscriber`] backs `subscribe()`,
//! `subscribe_next()` and `subscribe_all()`; it requests unbounded demand and
//! is the last line of protocol enforcement: signals arriving after a terminal
//! signal or after disposal are dropped and logged.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::error::FlowError;

use super::{SubscriptionRef, UNBOUNDED, guarded, lock};

/// Receiver of protocol signals.
///
/// Methods take `&self`: a subscriber is shared as `Arc<dyn Subscriber<T>>`
/// and may be signalled from whichever thread its publisher runs on, so
/// implementations keep their state behind interior mutability.
///
/// ### Implementation requirements
/// - Never block for long inside a callback; hand work to a scheduler instead.
/// - Do not call back into the subscription while holding your own locks.
pub trait Subscriber<T>: Send + Sync + 'static {
    /// Receives the subscription; always the first call.
    fn on_subscribe(&self, subscription: SubscriptionRef);

    /// Receives one item; never more than requested.
    fn on_next(&self, item: T);

    /// Terminal failure.
    fn on_error(&self, error: FlowError);

    /// Terminal success.
    fn on_complete(&self);
}

/// Shared subscriber handle.
pub type SubscriberRef<T> = Arc<dyn Subscriber<T>>;

/// Something a [`Disposable`] can stop.
pub(crate) trait DisposeHandle: Send + Sync {
    fn dispose(&self);
    fn is_disposed(&self) -> bool;
}

impl DisposeHandle for CancellationToken {
    fn dispose(&self) {
        self.cancel();
    }

    fn is_disposed(&self) -> bool {
        self.is_cancelled()
    }
}

/// Handle returned by closure-based `subscribe*` calls and by
/// `Scheduler::schedule`; disposing cancels the underlying work.
#[derive(Clone)]
pub struct Disposable {
    inner: Arc<dyn DisposeHandle>,
}

impl Disposable {
    pub(crate) fn new(inner: Arc<dyn DisposeHandle>) -> Self {
        Self { inner }
    }

    /// Cancels the subscription or scheduled task. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// True once disposed, or once the subscription terminated.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

const ACTIVE: u8 = 0;
const TERMINATED: u8 = 1;
const DISPOSED: u8 = 2;

type NextFn<T> = Box<dyn Fn(T) + Send + Sync>;
type ErrorFn = Box<dyn Fn(FlowError) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// Terminal subscriber driven by closures.
pub(crate) struct LambdaSubscriber<T> {
    next: Option<NextFn<T>>,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
    upstream: Mutex<Option<SubscriptionRef>>,
    state: AtomicU8,
}

impl<T: Send + 'static> LambdaSubscriber<T> {
    pub(crate) fn new(
        next: Option<NextFn<T>>,
        error: Option<ErrorFn>,
        complete: Option<CompleteFn>,
    ) -> Arc<Self> {
        Arc::new(Self {
            next,
            error,
            complete,
            upstream: Mutex::new(None),
            state: AtomicU8::new(ACTIVE),
        })
    }

    fn terminate(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, TERMINATED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Logs a dropped signal: debug after disposal, warn after a terminal one.
    fn dropped_late(&self, signal: &'static str) {
        if self.state.load(Ordering::Acquire) == DISPOSED {
            tracing::debug!(signal, "signal after disposal; dropped");
        } else {
            tracing::warn!(signal, "signal after terminal signal; dropped");
        }
    }

    fn deliver_error(&self, error: FlowError) {
        match &self.error {
            Some(f) => {
                if let Err(panic) = guarded(|| f(error)) {
                    tracing::error!(error = %panic, "error callback panicked");
                }
            }
            None => {
                tracing::error!(
                    label = error.as_label(),
                    error = %error,
                    "unhandled error reached a subscriber without an error callback"
                );
            }
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for LambdaSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        {
            let mut slot = lock(&self.upstream);
            if slot.is_some() {
                drop(slot);
                tracing::warn!("duplicate on_subscribe; cancelling the second subscription");
                subscription.cancel();
                return;
            }
            *slot = Some(subscription.clone());
        }
        if self.state.load(Ordering::Acquire) == DISPOSED {
            subscription.cancel();
            return;
        }
        subscription.request(UNBOUNDED);
    }

    fn on_next(&self, item: T) {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => {}
            DISPOSED => {
                tracing::debug!("on_next after disposal; item dropped");
                return;
            }
            _ => {
                tracing::warn!("on_next after terminal signal; item dropped");
                return;
            }
        }
        let Some(next) = &self.next else {
            return;
        };
        if let Err(panic) = guarded(|| next(item)) {
            if self.terminate() {
                if let Some(s) = lock(&self.upstream).take() {
                    s.cancel();
                }
                self.deliver_error(panic);
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        if !self.terminate() {
            self.dropped_late("on_error");
            return;
        }
        lock(&self.upstream).take();
        self.deliver_error(error);
    }

    fn on_complete(&self) {
        if !self.terminate() {
            self.dropped_late("on_complete");
            return;
        }
        lock(&self.upstream).take();
        if let Some(complete) = &self.complete {
            if let Err(panic) = guarded(complete) {
                tracing::error!(error = %panic, "complete callback panicked");
            }
        }
    }
}

impl<T: Send + 'static> DisposeHandle for LambdaSubscriber<T> {
    fn dispose(&self) {
        if self
            .state
            .compare_exchange(ACTIVE, DISPOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(s) = lock(&self.upstream).take() {
            s.cancel();
        }
    }

    fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) != ACTIVE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Subscription;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};

    #[derive(Default)]
    struct FakeUpstream {
        requested: AtomicU64,
        cancelled: AtomicBool,
    }

    impl Subscription for FakeUpstream {
        fn request(&self, n: u64) {
            self.requested.store(n, Ordering::SeqCst);
        }
        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn requests_unbounded_and_ignores_late_signals() {
        let seen = Arc::new(AtomicUsize::new(0));
        let completions = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let c = Arc::clone(&completions);
        let sub = LambdaSubscriber::<u32>::new(
            Some(Box::new(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            })),
            None,
            Some(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })),
        );
        let upstream = Arc::new(FakeUpstream::default());
        sub.on_subscribe(upstream.clone());
        assert_eq!(upstream.requested.load(Ordering::SeqCst), UNBOUNDED);

        sub.on_next(1);
        sub.on_complete();
        sub.on_next(2);
        sub.on_complete();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_cancels_upstream() {
        let sub = LambdaSubscriber::<u32>::new(None, None, None);
        let upstream = Arc::new(FakeUpstream::default());
        sub.on_subscribe(upstream.clone());
        let handle = Disposable::new(sub.clone());
        handle.dispose();
        assert!(handle.is_disposed());
        assert!(upstream.cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn items_after_dispose_are_dropped_quietly() {
        let seen = Arc::new(AtomicUsize::new(0));
        let completions = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let c = Arc::clone(&completions);
        let sub = LambdaSubscriber::<u32>::new(
            Some(Box::new(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            })),
            None,
            Some(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })),
        );
        sub.on_subscribe(Arc::new(FakeUpstream::default()));
        sub.on_next(1);
        Disposable::new(sub.clone()).dispose();

        sub.on_next(2);
        sub.on_error(FlowError::upstream("late"));
        sub.on_complete();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 0);
        assert_eq!(sub.state.load(Ordering::SeqCst), DISPOSED);
    }

    #[test]
    fn panicking_consumer_routes_to_error_callback() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&errors);
        let sub = LambdaSubscriber::<u32>::new(
            Some(Box::new(|_| panic!("consumer failed"))),
            Some(Box::new(move |err| lock(&e).push(err))),
            None,
        );
        let upstream = Arc::new(FakeUpstream::default());
        sub.on_subscribe(upstream.clone());
        sub.on_next(1);
        assert!(upstream.cancelled.load(Ordering::SeqCst));
        assert_eq!(
            lock(&errors).as_slice(),
            &[FlowError::Panicked {
                message: "consumer failed".into()
            }]
        );
    }
}
