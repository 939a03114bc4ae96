//! Combine-latest: re-emit the combination of every source's most recent
//! value whenever any source emits, once all of them have emitted.
//!
//! Sources are requested unbounded. Each arrival snapshots the latest row;
//! snapshots queue up and are combined in the drain loop, in arrival order,
//! as downstream demand allows.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::error::FlowError;
use crate::flow::Flow;
use crate::protocol::{
    EmptySubscription, Publisher, PublisherRef, Subscriber, SubscriberRef, Subscription,
    SubscriptionRef, UNBOUNDED, UpstreamSlot, WorkInProgress, guarded, lock, validate_request,
};

use super::zip::{Slot, slot_mismatch};

pub(crate) struct CombineLatestPublisher<T, R, F> {
    sources: Arc<[PublisherRef<T>]>,
    combiner: Arc<F>,
    _out: PhantomData<fn() -> R>,
}

impl<T, R, F> CombineLatestPublisher<T, R, F>
where
    F: Fn(Vec<T>) -> Result<R, FlowError>,
{
    pub(crate) fn new(sources: Vec<PublisherRef<T>>, combiner: F) -> Self {
        Self {
            sources: sources.into(),
            combiner: Arc::new(combiner),
            _out: PhantomData,
        }
    }
}

impl<T, R, F> Publisher<R> for CombineLatestPublisher<T, R, F>
where
    T: Clone + Send + 'static,
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
        let core = Arc::new(LatestCore {
            downstream: subscriber,
            combiner: Arc::clone(&self.combiner),
            upstreams: (0..n).map(|_| UpstreamSlot::new()).collect(),
            state: Mutex::new(LatestState {
                latest: vec![None; n],
                rows: VecDeque::new(),
                completed: 0,
                demand: 0,
                error: None,
                empty_source: false,
                terminated: false,
            }),
            wip: WorkInProgress::new(),
        });
        core.downstream.on_subscribe(core.clone());
        for (index, source) in self.sources.iter().enumerate() {
            if lock(&core.state).terminated {
                break;
            }
            source.subscribe(Arc::new(LatestInner {
                core: Arc::clone(&core),
                index,
            }));
        }
    }
}

struct LatestState<T> {
    latest: Vec<Option<T>>,
    rows: VecDeque<Vec<T>>,
    completed: usize,
    demand: u64,
    error: Option<FlowError>,
    /// Some source completed without ever emitting.
    empty_source: bool,
    terminated: bool,
}

enum Step<T> {
    Emit(Vec<T>),
    Fail(FlowError),
    Complete,
    Idle,
}

impl<T> LatestState<T> {
    fn step(&mut self) -> Step<T> {
        if self.terminated {
            return Step::Idle;
        }
        if let Some(err) = self.error.take() {
            self.shut();
            return Step::Fail(err);
        }
        if self.empty_source {
            self.shut();
            return Step::Complete;
        }
        if self.demand > 0 {
            if let Some(row) = self.rows.pop_front() {
                if self.demand != UNBOUNDED {
                    self.demand -= 1;
                }
                return Step::Emit(row);
            }
        }
        if self.completed == self.latest.len() && self.rows.is_empty() {
            self.shut();
            return Step::Complete;
        }
        Step::Idle
    }

    fn shut(&mut self) {
        self.terminated = true;
        self.rows.clear();
    }
}

struct LatestCore<T, R, F> {
    downstream: SubscriberRef<R>,
    combiner: Arc<F>,
    upstreams: Vec<UpstreamSlot>,
    state: Mutex<LatestState<T>>,
    wip: WorkInProgress,
}

impl<T, R, F> LatestCore<T, R, F>
where
    T: Clone + Send + 'static,
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
                let step = lock(&self.state).step();
                match step {
                    Step::Emit(row) => match guarded(|| (self.combiner)(row)).and_then(|r| r) {
                        Ok(value) => self.downstream.on_next(value),
                        Err(err) => {
                            lock(&self.state).shut();
                            self.cancel_all();
                            self.downstream.on_error(err);
                            return;
                        }
                    },
                    Step::Fail(err) => {
                        self.cancel_all();
                        self.downstream.on_error(err);
                        return;
                    }
                    Step::Complete => {
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

impl<T, R, F> Subscription for LatestCore<T, R, F>
where
    T: Clone + Send + 'static,
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

struct LatestInner<T, R, F> {
    core: Arc<LatestCore<T, R, F>>,
    index: usize,
}

impl<T, R, F> Subscriber<T> for LatestInner<T, R, F>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(Vec<T>) -> Result<R, FlowError> + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.core.upstreams[self.index].set(Arc::clone(&subscription)) {
            if lock(&self.core.state).terminated {
                self.core.upstreams[self.index].cancel();
            } else {
                subscription.request(UNBOUNDED);
            }
        }
    }

    fn on_next(&self, item: T) {
        {
            let mut st = lock(&self.core.state);
            if st.terminated {
                return;
            }
            st.latest[self.index] = Some(item);
            if st.latest.iter().all(Option::is_some) {
                let row = st.latest.iter().flatten().cloned().collect();
                st.rows.push_back(row);
            }
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
            st.completed += 1;
            if st.latest[self.index].is_none() {
                st.empty_source = true;
            }
        }
        self.core.upstreams[self.index].clear();
        self.core.drain();
    }
}

/// Combines the latest values of same-typed sources.
pub fn combine_latest<T, R, F>(sources: Vec<Flow<T>>, combiner: F) -> Flow<R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(Vec<T>) -> R + Send + Sync + 'static,
{
    let sources = sources.iter().map(Flow::as_publisher).collect();
    Flow::from_arc(Arc::new(CombineLatestPublisher::new(sources, move |row| {
        Ok(combiner(row))
    })))
}

/// Combines the latest values of two sources of different types.
pub fn combine_latest2<A, B, R, F>(a: Flow<A>, b: Flow<B>, combiner: F) -> Flow<R>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(A, B) -> R + Send + Sync + 'static,
{
    let sources = vec![
        a.map(Slot::<A, B, ()>::A).as_publisher(),
        b.map(Slot::<A, B, ()>::B).as_publisher(),
    ];
    Flow::from_arc(Arc::new(CombineLatestPublisher::new(
        sources,
        move |row: Vec<Slot<A, B, ()>>| {
            let mut row = row.into_iter();
            match (row.next(), row.next()) {
                (Some(Slot::A(a)), Some(Slot::B(b))) => Ok(combiner(a, b)),
                _ => Err(slot_mismatch()),
            }
        },
    )))
}
