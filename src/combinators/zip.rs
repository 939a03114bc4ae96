//! # Zip: one combined value per index.
//!
//! ```text
//! source 0 ──► [queue 0] ─┐
//! source 1 ──► [queue 1] ─┼──► all non-empty & demand ──► combiner(vec) ──► downstream
//! source k ──► [queue k] ─┘
//! ```
//!
//! ## Rules
//! - Each source is requested `prefetch` items up front and replenished in
//!   batches as tuples are emitted.
//! - Completes as soon as some source has completed with an empty queue;
//!   the others are cancelled. Output length is the shortest input length.
//! - The first error cancels every source and terminates.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::error::FlowError;
use crate::flow::Flow;
use crate::protocol::{
    EmptySubscription, Publisher, PublisherRef, Subscriber, SubscriberRef, Subscription,
    SubscriptionRef, UpstreamSlot, WorkInProgress, guarded, lock, validate_request,
};

/// Tag used to push heterogeneous sources through one engine.
pub(crate) enum Slot<A, B, C> {
    A(A),
    B(B),
    C(C),
}

impl<A: Clone, B: Clone, C: Clone> Clone for Slot<A, B, C> {
    fn clone(&self) -> Self {
        match self {
            Slot::A(a) => Slot::A(a.clone()),
            Slot::B(b) => Slot::B(b.clone()),
            Slot::C(c) => Slot::C(c.clone()),
        }
    }
}

pub(crate) fn slot_mismatch() -> FlowError {
    FlowError::protocol("combinator received values in an unexpected order")
}

pub(crate) struct ZipPublisher<T, R, F> {
    sources: Arc<[PublisherRef<T>]>,
    combiner: Arc<F>,
    prefetch: u64,
    _out: PhantomData<fn() -> R>,
}

impl<T, R, F> ZipPublisher<T, R, F>
where
    F: Fn(Vec<T>) -> Result<R, FlowError>,
{
    pub(crate) fn new(sources: Vec<PublisherRef<T>>, combiner: F, prefetch: usize) -> Self {
        Self {
            sources: sources.into(),
            combiner: Arc::new(combiner),
            prefetch: prefetch.max(1) as u64,
            _out: PhantomData,
        }
    }
}

impl<T, R, F> Publisher<R> for ZipPublisher<T, R, F>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(Vec<T>) -> Result<R, FlowError> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<R>) {
        let n = self.sources.len();
        if n == 0 {
            subscriber.on_subscribe(EmptySubscription::shared());
            subscriber.on_complete();
            return;
        }
        let core = Arc::new(ZipCore {
            downstream: subscriber,
            combiner: Arc::clone(&self.combiner),
            prefetch: self.prefetch,
            limit: (self.prefetch - (self.prefetch >> 2)).max(1),
            upstreams: (0..n).map(|_| UpstreamSlot::new()).collect(),
            state: Mutex::new(ZipState {
                queues: (0..n).map(|_| VecDeque::new()).collect(),
                done: vec![false; n],
                consumed: 0,
                demand: 0,
                error: None,
                terminated: false,
            }),
            wip: WorkInProgress::new(),
        });
        core.downstream.on_subscribe(core.clone());
        for (index, source) in self.sources.iter().enumerate() {
            if lock(&core.state).terminated {
                break;
            }
            source.subscribe(Arc::new(ZipInner {
                core: Arc::clone(&core),
                index,
            }));
        }
    }
}

struct ZipState<T> {
    queues: Vec<VecDeque<T>>,
    done: Vec<bool>,
    consumed: u64,
    demand: u64,
    error: Option<FlowError>,
    terminated: bool,
}

enum Step<T> {
    Emit(Vec<T>, Option<u64>),
    Fail(FlowError),
    Complete,
    Idle,
}

impl<T> ZipState<T> {
    fn step(&mut self, limit: u64) -> Step<T> {
        if self.terminated {
            return Step::Idle;
        }
        if let Some(err) = self.error.take() {
            self.terminated = true;
            return Step::Fail(err);
        }
        let exhausted = self
            .queues
            .iter()
            .zip(&self.done)
            .any(|(q, done)| *done && q.is_empty());
        if exhausted {
            self.terminated = true;
            return Step::Complete;
        }
        if self.demand == 0 || self.queues.iter().any(VecDeque::is_empty) {
            return Step::Idle;
        }
        let row: Vec<T> = self
            .queues
            .iter_mut()
            .filter_map(VecDeque::pop_front)
            .collect();
        if self.demand != u64::MAX {
            self.demand -= 1;
        }
        self.consumed += 1;
        let replenish = if self.consumed >= limit {
            Some(std::mem::take(&mut self.consumed))
        } else {
            None
        };
        Step::Emit(row, replenish)
    }

    fn shut(&mut self) {
        self.terminated = true;
        for q in &mut self.queues {
            q.clear();
        }
    }
}

struct ZipCore<T, R, F> {
    downstream: SubscriberRef<R>,
    combiner: Arc<F>,
    prefetch: u64,
    limit: u64,
    upstreams: Vec<UpstreamSlot>,
    state: Mutex<ZipState<T>>,
    wip: WorkInProgress,
}

impl<T, R, F> ZipCore<T, R, F>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(Vec<T>) -> Result<R, FlowError> + Send + Sync + 'static,
{
    fn cancel_all(&self) {
        for up in &self.upstreams {
            up.cancel();
        }
    }

    fn drain(&self) {
        self.wip.drain(|| {
            loop {
                let step = lock(&self.state).step(self.limit);
                match step {
                    Step::Emit(row, replenish) => match guarded(|| (self.combiner)(row)).and_then(|r| r) {
                        Ok(value) => {
                            self.downstream.on_next(value);
                            if let Some(n) = replenish {
                                for up in &self.upstreams {
                                    up.request(n);
                                }
                            }
                        }
                        Err(err) => {
                            lock(&self.state).shut();
                            self.cancel_all();
                            self.downstream.on_error(err);
                            return;
                        }
                    },
                    Step::Fail(err) => {
                        lock(&self.state).shut();
                        self.cancel_all();
                        self.downstream.on_error(err);
                        return;
                    }
                    Step::Complete => {
                        lock(&self.state).shut();
                        self.cancel_all();
                        self.downstream.on_complete();
                        return;
                    }
                    Step::Idle => return,
                }
            }
        });
    }
}

impl<T, R, F> Subscription for ZipCore<T, R, F>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(Vec<T>) -> Result<R, FlowError> + Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        {
            let mut st = lock(&self.state);
            if st.terminated {
                return;
            }
            match validate_request(n) {
                Ok(()) => st.demand = st.demand.saturating_add(n),
                Err(err) => st.error = Some(err),
            }
        }
        self.drain();
    }

    fn cancel(&self) {
        lock(&self.state).shut();
        self.cancel_all();
    }
}

struct ZipInner<T, R, F> {
    core: Arc<ZipCore<T, R, F>>,
    index: usize,
}

impl<T, R, F> Subscriber<T> for ZipInner<T, R, F>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(Vec<T>) -> Result<R, FlowError> + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.core.upstreams[self.index].set(Arc::clone(&subscription)) {
            if lock(&self.core.state).terminated {
                self.core.upstreams[self.index].cancel();
            } else {
                subscription.request(self.core.prefetch);
            }
        }
    }

    fn on_next(&self, item: T) {
        {
            let mut st = lock(&self.core.state);
            if st.terminated {
                return;
            }
            st.queues[self.index].push_back(item);
        }
        self.core.drain();
    }

    fn on_error(&self, error: FlowError) {
        {
            let mut st = lock(&self.core.state);
            if st.terminated {
                return;
            }
            st.error.get_or_insert(error);
        }
        self.core.upstreams[self.index].clear();
        self.core.drain();
    }

    fn on_complete(&self) {
        {
            let mut st = lock(&self.core.state);
            if st.terminated {
                return;
            }
            st.done[self.index] = true;
        }
        self.core.upstreams[self.index].clear();
        self.core.drain();
    }
}

/// Zips same-typed sources; `combiner` receives one value per source, in
/// source order.
pub fn zip<T, R, F>(sources: Vec<Flow<T>>, combiner: F) -> Flow<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(Vec<T>) -> R + Send + Sync + 'static,
{
    let sources = sources.iter().map(Flow::as_publisher).collect();
    Flow::from_arc(Arc::new(ZipPublisher::new(
        sources,
        move |row| Ok(combiner(row)),
        Config::global().prefetch_clamped(),
    )))
}

/// Zips two sources of different types.
pub fn zip2<A, B, R, F>(a: Flow<A>, b: Flow<B>, combiner: F) -> Flow<R>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
    F: Fn(A, B) -> R + Send + Sync + 'static,
{
    let sources = vec![
        a.map(Slot::<A, B, ()>::A).as_publisher(),
        b.map(Slot::<A, B, ()>::B).as_publisher(),
    ];
    Flow::from_arc(Arc::new(ZipPublisher::new(
        sources,
        move |row: Vec<Slot<A, B, ()>>| {
            let mut row = row.into_iter();
            match (row.next(), row.next()) {
                (Some(Slot::A(a)), Some(Slot::B(b))) => Ok(combiner(a, b)),
                _ => Err(slot_mismatch()),
            }
        },
        Config::global().prefetch_clamped(),
    )))
}

/// Zips three sources of different types.
pub fn zip3<A, B, C, R, F>(a: Flow<A>, b: Flow<B>, c: Flow<C>, combiner: F) -> Flow<R>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    R: Send + 'static,
    F: Fn(A, B, C) -> R + Send + Sync + 'static,
{
    let sources = vec![
        a.map(Slot::<A, B, C>::A).as_publisher(),
        b.map(Slot::<A, B, C>::B).as_publisher(),
        c.map(Slot::<A, B, C>::C).as_publisher(),
    ];
    Flow::from_arc(Arc::new(ZipPublisher::new(
        sources,
        move |row: Vec<Slot<A, B, C>>| {
            let mut row = row.into_iter();
            match (row.next(), row.next(), row.next()) {
                (Some(Slot::A(a)), Some(Slot::B(b)), Some(Slot::C(c))) => Ok(combiner(a, b, c)),
                _ => Err(slot_mismatch()),
            }
        },
        Config::global().prefetch_clamped(),
    )))
}
