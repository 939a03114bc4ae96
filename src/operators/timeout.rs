//! `timeout(d)`: fails with [`FlowError::Timeout`] when no item or terminal
//! signal arrives within `d` of subscription or of the previous item.
//!
//! Each arrival bumps an index; a timer armed for index `i` only fires if the
//! index is still `i`, so a stale timer racing with an item is harmless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::error::FlowError;
use crate::protocol::{
    Disposable, Publisher, PublisherRef, Subscriber, SubscriberRef, Subscription,
    SubscriptionRef, UpstreamSlot, lock,
};
use crate::schedulers::{Scheduler, Worker};

const DONE: u64 = u64::MAX;

pub(crate) struct TimeoutPublisher<T> {
    source: PublisherRef<T>,
    timeout: Duration,
}

impl<T> TimeoutPublisher<T> {
    pub(crate) fn new(source: PublisherRef<T>, timeout: Duration) -> Self {
        Self { source, timeout }
    }
}

impl<T: Send + 'static> Publisher<T> for TimeoutPublisher<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let stage = Arc::new_cyclic(|me| TimeoutSubscriber {
            me: me.clone(),
            downstream: subscriber,
            timeout: self.timeout,
            upstream: UpstreamSlot::new(),
            index: AtomicU64::new(0),
            worker: Scheduler::parallel().create_worker(),
            timer: Mutex::new(None),
        });
        self.source.subscribe(stage);
    }
}

struct TimeoutSubscriber<T> {
    me: Weak<TimeoutSubscriber<T>>,
    downstream: SubscriberRef<T>,
    timeout: Duration,
    upstream: UpstreamSlot,
    index: AtomicU64,
    worker: Worker,
    timer: Mutex<Option<Disposable>>,
}

impl<T: Send + 'static> TimeoutSubscriber<T> {
    fn arm(&self, index: u64) {
        let me = self.me.clone();
        let timer = self.worker.schedule_after(self.timeout, move || {
            if let Some(me) = me.upgrade() {
                me.fire(index);
            }
        });
        if let Some(prev) = lock(&self.timer).replace(timer) {
            prev.dispose();
        }
    }

    fn fire(&self, index: u64) {
        if self
            .index
            .compare_exchange(index, DONE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        tracing::debug!(timeout_ms = self.timeout.as_millis() as u64, "sequence timed out");
        self.upstream.cancel();
        self.worker.dispose();
        self.downstream.on_error(FlowError::Timeout {
            timeout: self.timeout,
        });
    }

    /// Claims the terminal slot; false if the timer (or a terminal) won.
    fn finish(&self) -> bool {
        if self.index.swap(DONE, Ordering::AcqRel) == DONE {
            return false;
        }
        if let Some(timer) = lock(&self.timer).take() {
            timer.dispose();
        }
        self.worker.dispose();
        true
    }
}

impl<T: Send + 'static> Subscriber<T> for TimeoutSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if !self.upstream.set(subscription) {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.arm(0);
        self.downstream.on_subscribe(me);
    }

    fn on_next(&self, item: T) {
        let current = self.index.load(Ordering::Acquire);
        if current == DONE
            || self
                .index
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return;
        }
        self.downstream.on_next(item);
        if self.index.load(Ordering::Acquire) == current + 1 {
            self.arm(current + 1);
        }
    }

    fn on_error(&self, error: FlowError) {
        if self.finish() {
            self.upstream.clear();
            self.downstream.on_error(error);
        }
    }

    fn on_complete(&self) {
        if self.finish() {
            self.upstream.clear();
            self.downstream.on_complete();
        }
    }
}

impl<T: Send + 'static> Subscription for TimeoutSubscriber<T> {
    fn request(&self, n: u64) {
        self.upstream.request(n);
    }

    fn cancel(&self) {
        if self.finish() {
            self.upstream.cancel();
        }
    }
}
