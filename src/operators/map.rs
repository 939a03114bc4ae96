//! Item-wise stages: `map`, `try_map`, `filter`.
//!
//! All three pass the upstream subscription straight through; only `filter`
//! touches demand (one replenishing request per dropped item).

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::FlowError;
use crate::protocol::{
    Publisher, PublisherRef, Subscriber, SubscriberRef, SubscriptionRef, UpstreamSlot, guarded,
};

/// Applies a fallible transformation; `Ok` forwards, `Err` or panic fails
/// the sequence and cancels upstream.
pub(crate) struct MapPublisher<T, U, F> {
    source: PublisherRef<T>,
    f: Arc<F>,
    _out: PhantomData<fn() -> U>,
}

impl<T, U, F> MapPublisher<T, U, F>
where
    F: Fn(T) -> Result<U, FlowError>,
{
    pub(crate) fn new(source: PublisherRef<T>, f: F) -> Self {
        Self {
            source,
            f: Arc::new(f),
            _out: PhantomData,
        }
    }
}

impl<T, U, F> Publisher<U> for MapPublisher<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<U, FlowError> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<U>) {
        self.source.subscribe(Arc::new(MapSubscriber {
            downstream: subscriber,
            f: Arc::clone(&self.f),
            upstream: UpstreamSlot::new(),
            done: AtomicBool::new(false),
            _in: PhantomData,
        }));
    }
}

struct MapSubscriber<T, U, F> {
    downstream: SubscriberRef<U>,
    f: Arc<F>,
    upstream: UpstreamSlot,
    done: AtomicBool,
    _in: PhantomData<fn(T)>,
}

impl<T, U, F> Subscriber<T> for MapSubscriber<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<U, FlowError> + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.upstream.set(Arc::clone(&subscription)) {
            self.downstream.on_subscribe(subscription);
        }
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        match guarded(|| (self.f)(item)).and_then(|r| r) {
            Ok(value) => self.downstream.on_next(value),
            Err(err) => {
                if !self.done.swap(true, Ordering::AcqRel) {
                    self.upstream.cancel();
                    self.downstream.on_error(err);
                }
            }
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

/// Drops items failing the predicate.
pub(crate) struct FilterPublisher<T, P> {
    source: PublisherRef<T>,
    predicate: Arc<P>,
}

impl<T, P> FilterPublisher<T, P>
where
    P: Fn(&T) -> bool,
{
    pub(crate) fn new(source: PublisherRef<T>, predicate: P) -> Self {
        Self {
            source,
            predicate: Arc::new(predicate),
        }
    }
}

impl<T, P> Publisher<T> for FilterPublisher<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        self.source.subscribe(Arc::new(FilterSubscriber {
            downstream: subscriber,
            predicate: Arc::clone(&self.predicate),
            upstream: UpstreamSlot::new(),
            done: AtomicBool::new(false),
        }));
    }
}

struct FilterSubscriber<T, P> {
    downstream: SubscriberRef<T>,
    predicate: Arc<P>,
    upstream: UpstreamSlot,
    done: AtomicBool,
}

impl<T, P> Subscriber<T> for FilterSubscriber<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.upstream.set(Arc::clone(&subscription)) {
            self.downstream.on_subscribe(subscription);
        }
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        match guarded(|| (self.predicate)(&item)) {
            Ok(true) => self.downstream.on_next(item),
            Ok(false) => self.upstream.request(1),
            Err(err) => {
                if !self.done.swap(true, Ordering::AcqRel) {
                    self.upstream.cancel();
                    self.downstream.on_error(err);
                }
            }
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
