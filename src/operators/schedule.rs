//! # Thread hand-off: `subscribe_on` and `publish_on`.
//!
//! ```text
//! subscribe_on(s):  caller ──on_subscribe──► downstream
//!                   worker(s) ──► source.subscribe(..)      (generation runs here)
//!                   request(n) ──► worker(s) ──► upstream.request(n)
//!
//! publish_on(s):    upstream ──on_next──► [queue ≤ prefetch] ──► worker(s) drain ──► downstream
//!                   replenish upstream after `limit` items are consumed
//! ```
//!
//! Both stages acquire one worker per subscription and release it on
//! terminal signal or cancel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::FlowError;
use crate::protocol::{
    Demand, Publisher, PublisherRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef,
    UpstreamSlot, WorkInProgress, lock, validate_request,
};
use crate::schedulers::{Scheduler, Worker};

pub(crate) struct SubscribeOnPublisher<T> {
    source: PublisherRef<T>,
    scheduler: Scheduler,
}

impl<T> SubscribeOnPublisher<T> {
    pub(crate) fn new(source: PublisherRef<T>, scheduler: Scheduler) -> Self {
        Self { source, scheduler }
    }
}

impl<T: Send + 'static> Publisher<T> for SubscribeOnPublisher<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let worker = self.scheduler.create_worker();
        let stage = Arc::new(SubscribeOnSubscriber {
            downstream: subscriber,
            worker: worker.clone(),
            state: Mutex::new(Pending::default()),
            done: AtomicBool::new(false),
        });
        stage.downstream.on_subscribe(stage.clone());
        let source = Arc::clone(&self.source);
        worker.schedule(move || source.subscribe(stage));
    }
}

#[derive(Default)]
struct Pending {
    upstream: Option<SubscriptionRef>,
    requested: u64,
    cancelled: bool,
}

struct SubscribeOnSubscriber<T> {
    downstream: SubscriberRef<T>,
    worker: Worker,
    state: Mutex<Pending>,
    done: AtomicBool,
}

impl<T: Send + 'static> Subscriber<T> for SubscribeOnSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        let requested = {
            let mut st = lock(&self.state);
            if st.cancelled || st.upstream.is_some() {
                None
            } else {
                st.upstream = Some(Arc::clone(&subscription));
                Some(std::mem::take(&mut st.requested))
            }
        };
        match requested {
            None => subscription.cancel(),
            Some(0) => {}
            Some(n) => subscription.request(n),
        }
    }

    fn on_next(&self, item: T) {
        if !self.done.load(Ordering::Acquire) {
            self.downstream.on_next(item);
        }
    }

    fn on_error(&self, error: FlowError) {
        if !self.done.swap(true, Ordering::AcqRel) {
            lock(&self.state).upstream.take();
            self.worker.dispose();
            self.downstream.on_error(error);
        }
    }

    fn on_complete(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            lock(&self.state).upstream.take();
            self.worker.dispose();
            self.downstream.on_complete();
        }
    }
}

impl<T: Send + 'static> Subscription for SubscribeOnSubscriber<T> {
    fn request(&self, n: u64) {
        let upstream = {
            let mut st = lock(&self.state);
            if st.cancelled {
                return;
            }
            match &st.upstream {
                Some(s) => Arc::clone(s),
                None => {
                    st.requested = st.requested.saturating_add(n);
                    return;
                }
            }
        };
        self.worker.schedule(move || upstream.request(n));
    }

    fn cancel(&self) {
        let upstream = {
            let mut st = lock(&self.state);
            st.cancelled = true;
            st.upstream.take()
        };
        if let Some(s) = upstream {
            s.cancel();
        }
        self.worker.dispose();
    }
}

pub(crate) struct PublishOnPublisher<T> {
    source: PublisherRef<T>,
    scheduler: Scheduler,
    prefetch: usize,
}

impl<T> PublishOnPublisher<T> {
    pub(crate) fn new(source: PublisherRef<T>, scheduler: Scheduler, prefetch: usize) -> Self {
        Self {
            source,
            scheduler,
            prefetch: prefetch.max(1),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for PublishOnPublisher<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let prefetch = self.prefetch as u64;
        let stage = Arc::new_cyclic(|me| PublishOnSubscriber {
            me: me.clone(),
            downstream: subscriber,
            worker: self.scheduler.create_worker(),
            upstream: UpstreamSlot::new(),
            prefetch,
            limit: (prefetch - (prefetch >> 2)).max(1),
            demand: Demand::new(),
            queue: Mutex::new(Queue::default()),
            wip: WorkInProgress::new(),
            cancelled: AtomicBool::new(false),
        });
        self.source.subscribe(stage);
    }
}

struct Queue<T> {
    items: VecDeque<T>,
    done: bool,
    error: Option<FlowError>,
    /// Items taken since the last replenishing request.
    consumed: u64,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            done: false,
            error: None,
            consumed: 0,
        }
    }
}

enum Next<T> {
    Item(T, Option<u64>),
    Error(FlowError),
    Complete,
    Empty,
}

struct PublishOnSubscriber<T> {
    me: Weak<PublishOnSubscriber<T>>,
    downstream: SubscriberRef<T>,
    worker: Worker,
    upstream: UpstreamSlot,
    prefetch: u64,
    limit: u64,
    demand: Demand,
    queue: Mutex<Queue<T>>,
    wip: WorkInProgress,
    cancelled: AtomicBool,
}

impl<T: Send + 'static> PublishOnSubscriber<T> {
    /// Starts a drain job on the worker unless one is already pending.
    fn schedule_drain(&self) {
        if !self.wip.try_enter() {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.worker.schedule(move || {
            let stage = Arc::clone(&me);
            me.wip.run_entered(|| stage.drain_pass());
        });
    }

    fn poll(&self) -> Next<T> {
        let has_demand = self.demand.get() > 0;
        let mut q = lock(&self.queue);
        if has_demand {
            if let Some(item) = q.items.pop_front() {
                q.consumed += 1;
                let replenish = if q.consumed >= self.limit && !q.done {
                    Some(std::mem::take(&mut q.consumed))
                } else {
                    None
                };
                return Next::Item(item, replenish);
            }
        }
        if q.done && q.items.is_empty() {
            return match q.error.take() {
                Some(err) => Next::Error(err),
                None => Next::Complete,
            };
        }
        Next::Empty
    }

    fn terminate(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.worker.dispose();
    }

    fn drain_pass(&self) {
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                lock(&self.queue).items.clear();
                return;
            }
            match self.poll() {
                Next::Item(item, replenish) => {
                    self.demand.produced(1);
                    self.downstream.on_next(item);
                    if let Some(n) = replenish {
                        self.upstream.request(n);
                    }
                }
                Next::Error(err) => {
                    self.terminate();
                    self.downstream.on_error(err);
                    return;
                }
                Next::Complete => {
                    self.terminate();
                    self.downstream.on_complete();
                    return;
                }
                Next::Empty => return,
            }
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for PublishOnSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if !self.upstream.set(Arc::clone(&subscription)) {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.downstream.on_subscribe(me);
        subscription.request(self.prefetch);
    }

    fn on_next(&self, item: T) {
        {
            let mut q = lock(&self.queue);
            if q.done {
                return;
            }
            q.items.push_back(item);
        }
        self.schedule_drain();
    }

    fn on_error(&self, error: FlowError) {
        {
            let mut q = lock(&self.queue);
            if q.done {
                return;
            }
            q.done = true;
            q.error = Some(error);
        }
        self.upstream.clear();
        self.schedule_drain();
    }

    fn on_complete(&self) {
        {
            let mut q = lock(&self.queue);
            if q.done {
                return;
            }
            q.done = true;
        }
        self.upstream.clear();
        self.schedule_drain();
    }
}

impl<T: Send + 'static> Subscription for PublishOnSubscriber<T> {
    fn request(&self, n: u64) {
        if let Err(err) = validate_request(n) {
            {
                let mut q = lock(&self.queue);
                q.items.clear();
                q.done = true;
                q.error = Some(err);
            }
            self.upstream.cancel();
            self.schedule_drain();
            return;
        }
        self.demand.add(n);
        self.schedule_drain();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.upstream.cancel();
        self.worker.dispose();
    }
}
