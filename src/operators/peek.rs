//! Side-effect hooks (`do_on_*`).
//!
//! A peek stage sits between upstream and downstream, runs its hook, then
//! forwards the signal unchanged. It wraps the subscription as well, so
//! request and cancel hooks see downstream's calls.
//!
//! ## Hook panics
//! - `do_on_subscribe`, `do_on_request`, `do_on_next`, `do_on_complete`:
//!   upstream is cancelled and downstream receives `Panicked` instead.
//! - `do_on_error`, `do_on_cancel`: logged; the signal proceeds unchanged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::FlowError;
use crate::protocol::{
    Publisher, PublisherRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef,
    UpstreamSlot, guarded,
};

type Hook<A> = Box<dyn Fn(A) + Send + Sync>;

/// Hooks of one peek stage; usually only one is set.
pub(crate) struct Hooks<T> {
    pub(crate) on_subscribe: Option<Hook<()>>,
    pub(crate) on_request: Option<Hook<u64>>,
    pub(crate) on_next: Option<Box<dyn Fn(&T) + Send + Sync>>,
    pub(crate) on_error: Option<Box<dyn Fn(&FlowError) + Send + Sync>>,
    pub(crate) on_complete: Option<Hook<()>>,
    pub(crate) on_cancel: Option<Hook<()>>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            on_subscribe: None,
            on_request: None,
            on_next: None,
            on_error: None,
            on_complete: None,
            on_cancel: None,
        }
    }
}

pub(crate) struct PeekPublisher<T> {
    source: PublisherRef<T>,
    hooks: Arc<Hooks<T>>,
}

impl<T> PeekPublisher<T> {
    pub(crate) fn new(source: PublisherRef<T>, hooks: Hooks<T>) -> Self {
        Self {
            source,
            hooks: Arc::new(hooks),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for PeekPublisher<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let stage = Arc::new_cyclic(|me| PeekSubscriber {
            me: me.clone(),
            downstream: subscriber,
            hooks: Arc::clone(&self.hooks),
            upstream: UpstreamSlot::new(),
            done: AtomicBool::new(false),
        });
        self.source.subscribe(stage);
    }
}

struct PeekSubscriber<T> {
    me: Weak<PeekSubscriber<T>>,
    downstream: SubscriberRef<T>,
    hooks: Arc<Hooks<T>>,
    upstream: UpstreamSlot,
    done: AtomicBool,
}

impl<T: Send + 'static> PeekSubscriber<T> {
    fn fail(&self, err: FlowError) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.upstream.cancel();
            self.downstream.on_error(err);
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for PeekSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if !self.upstream.set(subscription) {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let hooked = match &self.hooks.on_subscribe {
            Some(hook) => guarded(|| hook(())),
            None => Ok(()),
        };
        self.downstream.on_subscribe(me);
        if let Err(err) = hooked {
            self.fail(err);
        }
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        if let Some(hook) = &self.hooks.on_next {
            if let Err(err) = guarded(|| hook(&item)) {
                self.fail(err);
                return;
            }
        }
        self.downstream.on_next(item);
    }

    fn on_error(&self, error: FlowError) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.upstream.clear();
        if let Some(hook) = &self.hooks.on_error {
            if let Err(panic) = guarded(|| hook(&error)) {
                tracing::error!(error = %panic, "do_on_error hook panicked");
            }
        }
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        if let Some(hook) = &self.hooks.on_complete {
            if let Err(err) = guarded(|| hook(())) {
                if !self.done.swap(true, Ordering::AcqRel) {
                    self.upstream.clear();
                    self.downstream.on_error(err);
                }
                return;
            }
        }
        if !self.done.swap(true, Ordering::AcqRel) {
            self.upstream.clear();
            self.downstream.on_complete();
        }
    }
}

impl<T: Send + 'static> Subscription for PeekSubscriber<T> {
    fn request(&self, n: u64) {
        if let Some(hook) = &self.hooks.on_request {
            if let Err(err) = guarded(|| hook(n)) {
                self.fail(err);
                return;
            }
        }
        self.upstream.request(n);
    }

    fn cancel(&self) {
        if let Some(hook) = &self.hooks.on_cancel {
            if !self.done.load(Ordering::Acquire) {
                if let Err(panic) = guarded(|| hook(())) {
                    tracing::error!(error = %panic, "do_on_cancel hook panicked");
                }
            }
        }
        self.done.store(true, Ordering::Release);
        self.upstream.cancel();
    }
}

/// `Maybe::do_on_success`: the hook sees the value, or `None` on empty
/// completion, exactly once.
pub(crate) struct SuccessPublisher<T, F> {
    source: PublisherRef<T>,
    hook: Arc<F>,
}

impl<T, F> SuccessPublisher<T, F> {
    pub(crate) fn new(source: PublisherRef<T>, hook: F) -> Self {
        Self {
            source,
            hook: Arc::new(hook),
        }
    }
}

impl<T, F> Publisher<T> for SuccessPublisher<T, F>
where
    T: Send + 'static,
    F: Fn(Option<&T>) + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        self.source.subscribe(Arc::new(SuccessSubscriber {
            downstream: subscriber,
            hook: Arc::clone(&self.hook),
            upstream: UpstreamSlot::new(),
            seen: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }));
    }
}

struct SuccessSubscriber<T, F> {
    downstream: SubscriberRef<T>,
    hook: Arc<F>,
    upstream: UpstreamSlot,
    seen: AtomicBool,
    done: AtomicBool,
}

impl<T, F> Subscriber<T> for SuccessSubscriber<T, F>
where
    T: Send + 'static,
    F: Fn(Option<&T>) + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.upstream.set(Arc::clone(&subscription)) {
            self.downstream.on_subscribe(subscription);
        }
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) || self.seen.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = guarded(|| (self.hook)(Some(&item))) {
            if !self.done.swap(true, Ordering::AcqRel) {
                self.upstream.cancel();
                self.downstream.on_error(err);
            }
            return;
        }
        self.downstream.on_next(item);
    }

    fn on_error(&self, error: FlowError) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.upstream.clear();
            self.downstream.on_error(error);
        }
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.upstream.clear();
        if !self.seen.load(Ordering::Acquire) {
            if let Err(err) = guarded(|| (self.hook)(None)) {
                self.downstream.on_error(err);
                return;
            }
        }
        self.downstream.on_complete();
    }
}
