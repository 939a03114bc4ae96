//! Time-shifting stages backed by `parallel` workers.
//!
//! - `delay_elements(d)` is the flat-map engine with concurrency 1 over
//!   [`DelayedValue`]: each item is re-emitted `d` after it arrived, and the
//!   next one is only requested after that.
//! - `delay_subscription(d)` subscribes upstream `d` after `subscribe`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::FlowError;
use crate::protocol::{
    Disposable, Publisher, PublisherRef, Subscriber, SubscriberRef, Subscription,
    SubscriptionArbiter, SubscriptionRef, lock, validate_request,
};
use crate::schedulers::{Scheduler, Worker};

/// One value released after a delay; built per item by `delay_elements`,
/// so it is subscribed at most once.
pub(crate) struct DelayedValue<T> {
    value: Mutex<Option<T>>,
    delay: Duration,
}

impl<T> DelayedValue<T> {
    pub(crate) fn new(value: T, delay: Duration) -> Self {
        Self {
            value: Mutex::new(Some(value)),
            delay,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for DelayedValue<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let Some(value) = lock(&self.value).take() else {
            tracing::warn!("delayed value subscribed twice; completing empty");
            subscriber.on_subscribe(crate::protocol::EmptySubscription::shared());
            subscriber.on_complete();
            return;
        };
        let worker = Scheduler::parallel().create_worker();
        let subscription = Arc::new(DelayedSubscription {
            value: Mutex::new(Some(value)),
            downstream: Mutex::new(Some(Arc::clone(&subscriber))),
            delay: self.delay,
            worker,
            timer: Mutex::new(None),
        });
        subscriber.on_subscribe(subscription);
    }
}

struct DelayedSubscription<T> {
    value: Mutex<Option<T>>,
    downstream: Mutex<Option<SubscriberRef<T>>>,
    delay: Duration,
    worker: Worker,
    timer: Mutex<Option<Disposable>>,
}

impl<T: Send + 'static> Subscription for DelayedSubscription<T> {
    fn request(&self, n: u64) {
        if let Err(err) = validate_request(n) {
            lock(&self.value).take();
            if let Some(d) = lock(&self.downstream).take() {
                d.on_error(err);
            }
            self.worker.dispose();
            return;
        }
        let Some(value) = lock(&self.value).take() else {
            return;
        };
        let downstream = lock(&self.downstream).clone();
        let Some(downstream) = downstream else {
            return;
        };
        let worker = self.worker.clone();
        let timer = self.worker.schedule_after(self.delay, move || {
            downstream.on_next(value);
            downstream.on_complete();
            worker.dispose();
        });
        *lock(&self.timer) = Some(timer);
    }

    fn cancel(&self) {
        lock(&self.value).take();
        lock(&self.downstream).take();
        if let Some(timer) = lock(&self.timer).take() {
            timer.dispose();
        }
        self.worker.dispose();
    }
}

/// Subscribes upstream after a delay.
pub(crate) struct DelaySubscriptionPublisher<T> {
    source: PublisherRef<T>,
    delay: Duration,
}

impl<T> DelaySubscriptionPublisher<T> {
    pub(crate) fn new(source: PublisherRef<T>, delay: Duration) -> Self {
        Self { source, delay }
    }
}

impl<T: Send + 'static> Publisher<T> for DelaySubscriptionPublisher<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let worker = Scheduler::parallel().create_worker();
        let gate = Arc::new(DelayGate {
            arbiter: SubscriptionArbiter::new(),
            worker: worker.clone(),
            timer: Mutex::new(None),
        });
        subscriber.on_subscribe(gate.clone());

        let source = Arc::clone(&self.source);
        let relay = Arc::new(Relay {
            downstream: subscriber,
            gate: Arc::clone(&gate),
            done: AtomicBool::new(false),
        });
        let timer = worker.schedule_after(self.delay, move || {
            if !relay.gate.arbiter.is_cancelled() {
                source.subscribe(relay);
            }
        });
        *lock(&gate.timer) = Some(timer);
    }
}

struct DelayGate {
    arbiter: SubscriptionArbiter,
    worker: Worker,
    timer: Mutex<Option<Disposable>>,
}

impl Subscription for DelayGate {
    fn request(&self, n: u64) {
        self.arbiter.request(n);
    }

    fn cancel(&self) {
        self.arbiter.cancel();
        if let Some(timer) = lock(&self.timer).take() {
            timer.dispose();
        }
        self.worker.dispose();
    }
}

struct Relay<T> {
    downstream: SubscriberRef<T>,
    gate: Arc<DelayGate>,
    done: AtomicBool,
}

impl<T: Send + 'static> Subscriber<T> for Relay<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.gate.arbiter.set(subscription);
    }

    fn on_next(&self, item: T) {
        if !self.done.load(Ordering::Acquire) {
            self.downstream.on_next(item);
        }
    }

    fn on_error(&self, error: FlowError) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.gate.worker.dispose();
            self.downstream.on_error(error);
        }
    }

    fn on_complete(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.gate.worker.dispose();
            self.downstream.on_complete();
        }
    }
}
