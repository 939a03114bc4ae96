//! `switch_if_empty(fallback)`: subscribes `fallback` when upstream
//! completes without emitting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::FlowError;
use crate::protocol::{
    Publisher, PublisherRef, Subscriber, SubscriberRef, SubscriptionArbiter, SubscriptionRef,
};

pub(crate) struct SwitchIfEmptyPublisher<T> {
    source: PublisherRef<T>,
    fallback: PublisherRef<T>,
}

impl<T> SwitchIfEmptyPublisher<T> {
    pub(crate) fn new(source: PublisherRef<T>, fallback: PublisherRef<T>) -> Self {
        Self { source, fallback }
    }
}

impl<T: Send + 'static> Publisher<T> for SwitchIfEmptyPublisher<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let arbiter = Arc::new(SubscriptionArbiter::new());
        subscriber.on_subscribe(arbiter.clone());
        let stage = Arc::new_cyclic(|me| SwitchSubscriber {
            me: me.clone(),
            downstream: subscriber,
            fallback: Arc::clone(&self.fallback),
            arbiter,
            non_empty: AtomicBool::new(false),
            switched: AtomicBool::new(false),
        });
        self.source.subscribe(stage);
    }
}

struct SwitchSubscriber<T> {
    me: Weak<SwitchSubscriber<T>>,
    downstream: SubscriberRef<T>,
    fallback: PublisherRef<T>,
    arbiter: Arc<SubscriptionArbiter>,
    non_empty: AtomicBool,
    switched: AtomicBool,
}

impl<T: Send + 'static> Subscriber<T> for SwitchSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.arbiter.set(subscription);
    }

    fn on_next(&self, item: T) {
        self.non_empty.store(true, Ordering::Release);
        self.arbiter.produced(1);
        self.downstream.on_next(item);
    }

    fn on_error(&self, error: FlowError) {
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        if self.non_empty.load(Ordering::Acquire) || self.switched.swap(true, Ordering::AcqRel) {
            self.downstream.on_complete();
            return;
        }
        if self.arbiter.is_cancelled() {
            return;
        }
        if let Some(me) = self.me.upgrade() {
            self.fallback.subscribe(me);
        }
    }
}
