//! Leaf publishers: iterables, scalars, callables, terminal-only sources.

use std::iter::Peekable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::FlowError;
use crate::protocol::{
    Demand, EmptySubscription, Publisher, PublisherRef, SubscriberRef, Subscription, guarded,
    lock, validate_request,
};

/// Emits the items of a clonable iterable, honoring demand.
pub(crate) struct IterSource<I> {
    items: I,
}

impl<I> IterSource<I> {
    pub(crate) fn new(items: I) -> Self {
        Self { items }
    }
}

impl<I> Publisher<I::Item> for IterSource<I>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<I::Item>) {
        let mut iter = self.items.clone().into_iter().peekable();
        if iter.peek().is_none() {
            subscriber.on_subscribe(EmptySubscription::shared());
            subscriber.on_complete();
            return;
        }
        let subscription = Arc::new(IterSubscription {
            iter: Mutex::new(iter),
            downstream: Mutex::new(Some(Arc::clone(&subscriber))),
            demand: Demand::new(),
            cancelled: AtomicBool::new(false),
        });
        subscriber.on_subscribe(subscription);
    }
}

struct IterSubscription<It: Iterator> {
    iter: Mutex<Peekable<It>>,
    downstream: Mutex<Option<SubscriberRef<It::Item>>>,
    demand: Demand,
    cancelled: AtomicBool,
}

impl<It> IterSubscription<It>
where
    It: Iterator + Send,
    It::Item: Send + 'static,
{
    /// Takes the downstream out, marking the subscription finished.
    fn finish(&self) -> Option<SubscriberRef<It::Item>> {
        self.cancelled.store(true, Ordering::Release);
        lock(&self.downstream).take()
    }

    fn emit_loop(&self) {
        let Some(downstream) = lock(&self.downstream).clone() else {
            return;
        };
        let mut requested = self.demand.get();
        let mut emitted = 0u64;
        loop {
            while emitted != requested {
                if self.cancelled.load(Ordering::Acquire) {
                    return;
                }
                let (item, exhausted) = {
                    let mut iter = lock(&self.iter);
                    let item = iter.next();
                    let exhausted = iter.peek().is_none();
                    (item, exhausted)
                };
                let Some(item) = item else {
                    if let Some(d) = self.finish() {
                        d.on_complete();
                    }
                    return;
                };
                downstream.on_next(item);
                emitted += 1;
                if exhausted {
                    if let Some(d) = self.finish() {
                        d.on_complete();
                    }
                    return;
                }
            }
            requested = self.demand.get();
            if requested == emitted {
                requested = self.demand.produced(emitted);
                if requested == 0 {
                    return;
                }
                emitted = 0;
            }
        }
    }
}

impl<It> Subscription for IterSubscription<It>
where
    It: Iterator + Send,
    It::Item: Send + 'static,
{
    fn request(&self, n: u64) {
        if let Err(err) = validate_request(n) {
            if let Some(d) = self.finish() {
                d.on_error(err);
            }
            return;
        }
        if self.demand.add(n) == 0 {
            self.emit_loop();
        }
    }

    fn cancel(&self) {
        self.finish();
    }
}

type Producer<T> = Box<dyn FnOnce() -> Result<Option<T>, FlowError> + Send>;

/// Zero-or-one source whose value is produced on the first request.
pub(crate) struct CallableSource<F> {
    f: Arc<F>,
}

impl<F> CallableSource<F> {
    pub(crate) fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<T, F> Publisher<T> for CallableSource<F>
where
    T: Send + 'static,
    F: Fn() -> Result<Option<T>, FlowError> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let f = Arc::clone(&self.f);
        let producer: Producer<T> = Box::new(move || f());
        subscriber.on_subscribe(Arc::new(CallableSubscription {
            producer: Mutex::new(Some(producer)),
            downstream: Mutex::new(Some(Arc::clone(&subscriber))),
        }));
    }
}

struct CallableSubscription<T> {
    producer: Mutex<Option<Producer<T>>>,
    downstream: Mutex<Option<SubscriberRef<T>>>,
}

impl<T: Send + 'static> Subscription for CallableSubscription<T> {
    fn request(&self, n: u64) {
        let Some(producer) = lock(&self.producer).take() else {
            return;
        };
        if let Err(err) = validate_request(n) {
            if let Some(d) = lock(&self.downstream).take() {
                d.on_error(err);
            }
            return;
        }
        let outcome = guarded(producer).and_then(|r| r);
        // Cancelled while producing: nothing is delivered.
        let Some(downstream) = lock(&self.downstream).take() else {
            return;
        };
        match outcome {
            Ok(Some(value)) => {
                downstream.on_next(value);
                downstream.on_complete();
            }
            Ok(None) => downstream.on_complete(),
            Err(err) => downstream.on_error(err),
        }
    }

    fn cancel(&self) {
        lock(&self.producer).take();
        lock(&self.downstream).take();
    }
}

/// Completes right after `on_subscribe`.
pub(crate) struct EmptySource;

impl<T: Send + 'static> Publisher<T> for EmptySource {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        subscriber.on_subscribe(EmptySubscription::shared());
        subscriber.on_complete();
    }
}

/// Fails right after `on_subscribe`.
pub(crate) struct ErrorSource {
    pub(crate) error: FlowError,
}

impl<T: Send + 'static> Publisher<T> for ErrorSource {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        subscriber.on_subscribe(EmptySubscription::shared());
        subscriber.on_error(self.error.clone());
    }
}

/// Never signals anything after `on_subscribe`.
pub(crate) struct NeverSource;

impl<T: Send + 'static> Publisher<T> for NeverSource {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        subscriber.on_subscribe(EmptySubscription::shared());
    }
}

/// Builds a fresh publisher per subscription.
pub(crate) struct DeferSource<F> {
    factory: F,
}

impl<F> DeferSource<F> {
    pub(crate) fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<T, F> Publisher<T> for DeferSource<F>
where
    T: Send + 'static,
    F: Fn() -> PublisherRef<T> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        match guarded(&self.factory) {
            Ok(source) => source.subscribe(subscriber),
            Err(err) => ErrorSource { error: err }.subscribe(subscriber),
        }
    }
}
