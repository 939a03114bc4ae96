//! # Error recovery: `on_error_resume`, `retry`, `retry_backoff`.
//!
//! Every stage here hands downstream one [`SubscriptionArbiter`] for the
//! whole run and swaps the upstream behind it, so outstanding demand carries
//! over to the fallback or to the next attempt.
//!
//! ```text
//! attempt #0 ──error──► retry? ──► [sleep on parallel] ──► attempt #1 ──► ...
//!                          └─budget spent─► RetryExhausted { attempts, last }
//! ```
//!
//! Resubscription is trampolined through a work-in-progress counter: a source
//! that fails synchronously inside `subscribe` does not grow the stack.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::FlowError;
use crate::policies::BackoffPolicy;
use crate::protocol::{
    Disposable, Publisher, PublisherRef, Subscriber, SubscriberRef, Subscription,
    SubscriptionArbiter, SubscriptionRef, WorkInProgress, guarded, lock,
};
use crate::schedulers::{Scheduler, Worker};

/// Switches to `f(error)` on the first error.
pub(crate) struct ResumePublisher<T, F> {
    source: PublisherRef<T>,
    f: Arc<F>,
}

impl<T, F> ResumePublisher<T, F>
where
    F: Fn(FlowError) -> PublisherRef<T>,
{
    pub(crate) fn new(source: PublisherRef<T>, f: F) -> Self {
        Self {
            source,
            f: Arc::new(f),
        }
    }
}

impl<T, F> Publisher<T> for ResumePublisher<T, F>
where
    T: Send + 'static,
    F: Fn(FlowError) -> PublisherRef<T> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let arbiter = Arc::new(SubscriptionArbiter::new());
        subscriber.on_subscribe(arbiter.clone());
        let stage = Arc::new_cyclic(|me| ResumeSubscriber {
            me: me.clone(),
            downstream: subscriber,
            f: Arc::clone(&self.f),
            arbiter,
            switched: AtomicBool::new(false),
        });
        self.source.subscribe(stage);
    }
}

struct ResumeSubscriber<T, F> {
    me: Weak<ResumeSubscriber<T, F>>,
    downstream: SubscriberRef<T>,
    f: Arc<F>,
    arbiter: Arc<SubscriptionArbiter>,
    switched: AtomicBool,
}

impl<T, F> Subscriber<T> for ResumeSubscriber<T, F>
where
    T: Send + 'static,
    F: Fn(FlowError) -> PublisherRef<T> + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.arbiter.set(subscription);
    }

    fn on_next(&self, item: T) {
        self.arbiter.produced(1);
        self.downstream.on_next(item);
    }

    fn on_error(&self, error: FlowError) {
        if self.arbiter.is_cancelled() {
            tracing::debug!(error = %error, "error after cancellation; dropped");
            return;
        }
        if self.switched.swap(true, Ordering::AcqRel) {
            self.downstream.on_error(error);
            return;
        }
        tracing::debug!(error = %error, "resuming with fallback sequence");
        match guarded(|| (self.f)(error)) {
            Ok(fallback) => {
                if let Some(me) = self.me.upgrade() {
                    fallback.subscribe(me);
                }
            }
            Err(err) => self.downstream.on_error(err),
        }
    }

    fn on_complete(&self) {
        self.downstream.on_complete();
    }
}

/// Resubscribes on error, optionally after a backoff delay.
pub(crate) struct RetryPublisher<T> {
    source: PublisherRef<T>,
    max_retries: u32,
    backoff: Option<BackoffPolicy>,
}

impl<T> RetryPublisher<T> {
    pub(crate) fn immediate(source: PublisherRef<T>, max_retries: u32) -> Self {
        Self {
            source,
            max_retries,
            backoff: None,
        }
    }

    pub(crate) fn with_backoff(source: PublisherRef<T>, policy: BackoffPolicy) -> Self {
        Self {
            source,
            max_retries: policy.max_retries,
            backoff: Some(policy),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for RetryPublisher<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let stage = Arc::new_cyclic(|me| RetrySubscriber {
            me: me.clone(),
            downstream: subscriber,
            source: Arc::clone(&self.source),
            max_retries: self.max_retries,
            backoff: self.backoff,
            arbiter: SubscriptionArbiter::new(),
            attempts: AtomicU32::new(0),
            wip: WorkInProgress::new(),
            worker: Mutex::new(None),
            timer: Mutex::new(None),
            done: AtomicBool::new(false),
        });
        stage.downstream.on_subscribe(stage.clone());
        stage.resubscribe();
    }
}

struct RetrySubscriber<T> {
    me: Weak<RetrySubscriber<T>>,
    downstream: SubscriberRef<T>,
    source: PublisherRef<T>,
    max_retries: u32,
    backoff: Option<BackoffPolicy>,
    arbiter: SubscriptionArbiter,
    attempts: AtomicU32,
    wip: WorkInProgress,
    worker: Mutex<Option<Worker>>,
    timer: Mutex<Option<Disposable>>,
    done: AtomicBool,
}

impl<T: Send + 'static> RetrySubscriber<T> {
    fn resubscribe(&self) {
        self.wip.drain(|| {
            if self.arbiter.is_cancelled() || self.done.load(Ordering::Acquire) {
                return;
            }
            if let Some(me) = self.me.upgrade() {
                self.source.subscribe(me);
            }
        });
    }

    fn release_worker(&self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.dispose();
        }
        if let Some(worker) = lock(&self.worker).take() {
            worker.dispose();
        }
    }

    fn schedule_retry(&self, attempt: u32, policy: &BackoffPolicy) {
        let delay = policy.next(attempt);
        let worker = lock(&self.worker)
            .get_or_insert_with(|| Scheduler::parallel().create_worker())
            .clone();
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling resubscription");
        let me = self.me.clone();
        let timer = worker.schedule_after(delay, move || {
            if let Some(me) = me.upgrade() {
                me.resubscribe();
            }
        });
        *lock(&self.timer) = Some(timer);
    }
}

impl<T: Send + 'static> Subscriber<T> for RetrySubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.arbiter.set(subscription);
    }

    fn on_next(&self, item: T) {
        self.arbiter.produced(1);
        self.downstream.on_next(item);
    }

    fn on_error(&self, error: FlowError) {
        if self.done.load(Ordering::Acquire) || self.arbiter.is_cancelled() {
            return;
        }
        let attempt = self.attempts.load(Ordering::Acquire);
        if attempt >= self.max_retries {
            self.done.store(true, Ordering::Release);
            self.release_worker();
            self.downstream.on_error(FlowError::RetryExhausted {
                attempts: attempt,
                last: Box::new(error),
            });
            return;
        }
        self.attempts.store(attempt + 1, Ordering::Release);
        tracing::debug!(attempt = attempt + 1, error = %error, "resubscribing after error");
        match &self.backoff {
            Some(policy) => self.schedule_retry(attempt, policy),
            None => self.resubscribe(),
        }
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.release_worker();
        self.downstream.on_complete();
    }
}

impl<T: Send + 'static> Subscription for RetrySubscriber<T> {
    fn request(&self, n: u64) {
        self.arbiter.request(n);
    }

    fn cancel(&self) {
        self.arbiter.cancel();
        self.release_worker();
    }
}
