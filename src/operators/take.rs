//! Shaping stages: `take(n)` (also backing `next()`) and `collect_list()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::FlowError;
use crate::protocol::{
    EmptySubscription, Publisher, PublisherRef, Subscriber, SubscriberRef, Subscription,
    SubscriptionRef, UNBOUNDED, UpstreamSlot, lock, validate_request,
};

/// Forwards at most `limit` items, then cancels upstream and completes.
pub(crate) struct TakePublisher<T> {
    source: PublisherRef<T>,
    limit: u64,
}

impl<T> TakePublisher<T> {
    pub(crate) fn new(source: PublisherRef<T>, limit: u64) -> Self {
        Self { source, limit }
    }
}

impl<T: Send + 'static> Publisher<T> for TakePublisher<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let stage = Arc::new_cyclic(|me| TakeSubscriber {
            me: me.clone(),
            downstream: subscriber,
            limit: self.limit,
            upstream: UpstreamSlot::new(),
            counts: Mutex::new(TakeCounts::default()),
            done: AtomicBool::new(false),
        });
        self.source.subscribe(stage);
    }
}

#[derive(Default)]
struct TakeCounts {
    /// Items forwarded downstream.
    seen: u64,
    /// Demand passed upstream so far.
    forwarded: u64,
}

struct TakeSubscriber<T> {
    me: Weak<TakeSubscriber<T>>,
    downstream: SubscriberRef<T>,
    limit: u64,
    upstream: UpstreamSlot,
    counts: Mutex<TakeCounts>,
    done: AtomicBool,
}

impl<T: Send + 'static> Subscriber<T> for TakeSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if !self.upstream.set(subscription) {
            return;
        }
        if self.limit == 0 {
            self.done.store(true, Ordering::Release);
            self.upstream.cancel();
            self.downstream.on_subscribe(EmptySubscription::shared());
            self.downstream.on_complete();
            return;
        }
        if let Some(me) = self.me.upgrade() {
            self.downstream.on_subscribe(me);
        }
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        let last = {
            let mut c = lock(&self.counts);
            c.seen += 1;
            c.seen >= self.limit
        };
        if last {
            self.done.store(true, Ordering::Release);
            self.upstream.cancel();
            self.downstream.on_next(item);
            self.downstream.on_complete();
        } else {
            self.downstream.on_next(item);
        }
    }

    fn on_error(&self, error: FlowError) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.upstream.clear();
            self.downstream.on_error(error);
        }
    }

    fn on_complete(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.upstream.clear();
            self.downstream.on_complete();
        }
    }
}

impl<T: Send + 'static> Subscription for TakeSubscriber<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            // Let the source report the violation.
            self.upstream.request(0);
            return;
        }
        let grant = {
            let mut c = lock(&self.counts);
            let left = self.limit - c.forwarded;
            let grant = n.min(left);
            c.forwarded += grant;
            grant
        };
        if grant > 0 {
            self.upstream.request(grant);
        }
    }

    fn cancel(&self) {
        self.done.store(true, Ordering::Release);
        self.upstream.cancel();
    }
}

/// Buffers every item and emits one `Vec` on completion.
pub(crate) struct CollectPublisher<T> {
    source: PublisherRef<T>,
}

impl<T> CollectPublisher<T> {
    pub(crate) fn new(source: PublisherRef<T>) -> Self {
        Self { source }
    }
}

impl<T: Send + 'static> Publisher<Vec<T>> for CollectPublisher<T> {
    fn subscribe(&self, subscriber: SubscriberRef<Vec<T>>) {
        let stage = Arc::new_cyclic(|me| CollectSubscriber {
            me: me.clone(),
            downstream: subscriber,
            upstream: UpstreamSlot::new(),
            items: Mutex::new(Some(Vec::new())),
            requested: AtomicBool::new(false),
        });
        self.source.subscribe(stage);
    }
}

struct CollectSubscriber<T> {
    me: Weak<CollectSubscriber<T>>,
    downstream: SubscriberRef<Vec<T>>,
    upstream: UpstreamSlot,
    /// `None` once terminated.
    items: Mutex<Option<Vec<T>>>,
    requested: AtomicBool,
}

impl<T: Send + 'static> Subscriber<T> for CollectSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if !self.upstream.set(subscription) {
            return;
        }
        if let Some(me) = self.me.upgrade() {
            self.downstream.on_subscribe(me);
        }
    }

    fn on_next(&self, item: T) {
        if let Some(items) = lock(&self.items).as_mut() {
            items.push(item);
        }
    }

    fn on_error(&self, error: FlowError) {
        if lock(&self.items).take().is_some() {
            self.upstream.clear();
            self.downstream.on_error(error);
        }
    }

    fn on_complete(&self) {
        let items = lock(&self.items).take();
        if let Some(items) = items {
            self.upstream.clear();
            self.downstream.on_next(items);
            self.downstream.on_complete();
        }
    }
}

impl<T: Send + 'static> Subscription for CollectSubscriber<T> {
    fn request(&self, n: u64) {
        if let Err(err) = validate_request(n) {
            if lock(&self.items).take().is_some() {
                self.upstream.cancel();
                self.downstream.on_error(err);
            }
            return;
        }
        if !self.requested.swap(true, Ordering::AcqRel) {
            self.upstream.request(UNBOUNDED);
        }
    }

    fn cancel(&self) {
        lock(&self.items).take();
        self.upstream.cancel();
    }
}
