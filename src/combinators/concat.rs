//! Sequential concatenation, with or without delayed errors.
//!
//! One [`SubscriptionArbiter`] is handed downstream; each source in turn is
//! installed behind it, inheriting whatever demand is still outstanding.
//! Moving to the next source is trampolined, so a long list of synchronous
//! sources runs in a loop rather than recursing.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::FlowError;
use crate::protocol::{
    Publisher, PublisherRef, Subscriber, SubscriberRef, Subscription, SubscriptionArbiter,
    SubscriptionRef, WorkInProgress, lock,
};

pub(crate) struct ConcatPublisher<T> {
    sources: Arc<[PublisherRef<T>]>,
    delay_error: bool,
}

impl<T> ConcatPublisher<T> {
    pub(crate) fn new(sources: Vec<PublisherRef<T>>, delay_error: bool) -> Self {
        Self {
            sources: sources.into(),
            delay_error,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for ConcatPublisher<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let stage = Arc::new_cyclic(|me| ConcatSubscriber {
            me: me.clone(),
            downstream: subscriber,
            sources: Arc::clone(&self.sources),
            delay_error: self.delay_error,
            arbiter: SubscriptionArbiter::new(),
            index: AtomicUsize::new(0),
            produced: AtomicU64::new(0),
            error: Mutex::new(None),
            wip: WorkInProgress::new(),
        });
        stage.downstream.on_subscribe(stage.clone());
        stage.advance();
    }
}

struct ConcatSubscriber<T> {
    me: Weak<ConcatSubscriber<T>>,
    downstream: SubscriberRef<T>,
    sources: Arc<[PublisherRef<T>]>,
    delay_error: bool,
    arbiter: SubscriptionArbiter,
    index: AtomicUsize,
    /// Items emitted by the current source.
    produced: AtomicU64,
    error: Mutex<Option<FlowError>>,
    wip: WorkInProgress,
}

impl<T: Send + 'static> ConcatSubscriber<T> {
    /// Subscribes the next source, or terminates when none is left.
    fn advance(&self) {
        self.wip.drain(|| {
            if self.arbiter.is_cancelled() {
                return;
            }
            let idx = self.index.fetch_add(1, Ordering::AcqRel);
            match self.sources.get(idx) {
                Some(source) => {
                    if let Some(me) = self.me.upgrade() {
                        source.subscribe(me);
                    }
                }
                None => match lock(&self.error).take() {
                    Some(err) => self.downstream.on_error(err),
                    None => self.downstream.on_complete(),
                },
            }
        });
    }

    fn source_finished(&self) {
        let n = self.produced.swap(0, Ordering::AcqRel);
        if n > 0 {
            self.arbiter.produced(n);
        }
        self.advance();
    }
}

impl<T: Send + 'static> Subscriber<T> for ConcatSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.arbiter.set(subscription);
    }

    fn on_next(&self, item: T) {
        self.produced.fetch_add(1, Ordering::AcqRel);
        self.downstream.on_next(item);
    }

    fn on_error(&self, error: FlowError) {
        if !self.delay_error {
            self.downstream.on_error(error);
            return;
        }
        {
            let mut held = lock(&self.error);
            if held.is_none() {
                *held = Some(error);
            } else {
                tracing::debug!(error = %error, "additional error dropped; first error is kept");
            }
        }
        self.source_finished();
    }

    fn on_complete(&self) {
        self.source_finished();
    }
}

impl<T: Send + 'static> Subscription for ConcatSubscriber<T> {
    fn request(&self, n: u64) {
        self.arbiter.request(n);
    }

    fn cancel(&self) {
        self.arbiter.cancel();
    }
}
