//! `log()` / `log_as(category)`: traces every signal, request and cancel.
//!
//! Events go to `tracing` at INFO under target `sluice::log`, with the
//! category and the signal name as structured fields:
//!
//! ```text
//! INFO sluice::log: category="range" signal="onSubscribe"
//! INFO sluice::log: category="range" signal="request" n=unbounded
//! INFO sluice::log: category="range" signal="onNext" value=1
//! INFO sluice::log: category="range" signal="onComplete"
//! ```

use std::fmt::Debug;
use std::sync::{Arc, Weak};

use crate::error::FlowError;
use crate::protocol::{
    Publisher, PublisherRef, SignalKind, Subscriber, SubscriberRef, Subscription,
    SubscriptionRef, UNBOUNDED, UpstreamSlot,
};

pub(crate) struct LogPublisher<T> {
    source: PublisherRef<T>,
    category: Arc<str>,
}

impl<T> LogPublisher<T> {
    pub(crate) fn new(source: PublisherRef<T>, category: &str) -> Self {
        Self {
            source,
            category: Arc::from(category),
        }
    }
}

impl<T: Debug + Send + 'static> Publisher<T> for LogPublisher<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let stage = Arc::new_cyclic(|me| LogSubscriber {
            me: me.clone(),
            downstream: subscriber,
            category: Arc::clone(&self.category),
            upstream: UpstreamSlot::new(),
        });
        self.source.subscribe(stage);
    }
}

struct LogSubscriber<T> {
    me: Weak<LogSubscriber<T>>,
    downstream: SubscriberRef<T>,
    category: Arc<str>,
    upstream: UpstreamSlot,
}

impl<T: Debug + Send + 'static> Subscriber<T> for LogSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        tracing::info!(
            target: "sluice::log",
            category = &*self.category,
            signal = SignalKind::Subscribe.as_label()
        );
        if !self.upstream.set(subscription) {
            return;
        }
        if let Some(me) = self.me.upgrade() {
            self.downstream.on_subscribe(me);
        }
    }

    fn on_next(&self, item: T) {
        tracing::info!(
            target: "sluice::log",
            category = &*self.category,
            signal = SignalKind::Next.as_label(),
            value = ?item
        );
        self.downstream.on_next(item);
    }

    fn on_error(&self, error: FlowError) {
        tracing::info!(
            target: "sluice::log",
            category = &*self.category,
            signal = SignalKind::Error.as_label(),
            error = %error
        );
        self.upstream.clear();
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        tracing::info!(
            target: "sluice::log",
            category = &*self.category,
            signal = SignalKind::Complete.as_label()
        );
        self.upstream.clear();
        self.downstream.on_complete();
    }
}

impl<T: Debug + Send + 'static> Subscription for LogSubscriber<T> {
    fn request(&self, n: u64) {
        if n == UNBOUNDED {
            tracing::info!(target: "sluice::log", category = &*self.category, signal = "request", n = "unbounded");
        } else {
            tracing::info!(target: "sluice::log", category = &*self.category, signal = "request", n);
        }
        self.upstream.request(n);
    }

    fn cancel(&self) {
        tracing::info!(target: "sluice::log", category = &*self.category, signal = "cancel");
        self.upstream.cancel();
    }
}
