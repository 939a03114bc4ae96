//! # Flat-map engine.
//!
//! One stage implements `flat_map`, `flat_map_sequential`, `merge`,
//! `merge_sequential`, `merge_delay_error` and `delay_elements`:
//!
//! ```text
//! outer ──► f(item) ──► inner #0 ──┐
//!                   ──► inner #1 ──┼──► [queue | ordered lanes] ──► drain ──► downstream
//!                   ──► inner #k ──┘        (emits ≤ demand, one drainer at a time)
//! ```
//!
//! ## Rules
//! - At most `concurrency` inners are live; each completion requests one more
//!   outer item.
//! - Inners are requested unbounded; their items wait in the stage's buffer
//!   until downstream demand allows.
//! - Unordered mode releases items in arrival order. Ordered mode keeps one
//!   lane per inner and releases lanes strictly in outer order.
//! - Without `delay_error` the first error cancels everything and terminates.
//!   With it, the first error is held until every source has finished.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};

use crate::error::FlowError;
use crate::protocol::{
    Publisher, PublisherRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef,
    UNBOUNDED, UpstreamSlot, WorkInProgress, guarded, lock, validate_request,
};

/// Engine settings.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FlatMapOptions {
    pub(crate) concurrency: usize,
    pub(crate) ordered: bool,
    pub(crate) delay_error: bool,
}

pub(crate) struct FlatMapPublisher<T, U, F> {
    source: PublisherRef<T>,
    f: Arc<F>,
    opts: FlatMapOptions,
    _out: PhantomData<fn() -> U>,
}

impl<T, U, F> FlatMapPublisher<T, U, F>
where
    F: Fn(T) -> PublisherRef<U>,
{
    pub(crate) fn new(source: PublisherRef<T>, f: F, opts: FlatMapOptions) -> Self {
        Self {
            source,
            f: Arc::new(f),
            opts: FlatMapOptions {
                concurrency: opts.concurrency.max(1),
                ..opts
            },
            _out: PhantomData,
        }
    }
}

impl<T, U, F> Publisher<U> for FlatMapPublisher<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> PublisherRef<U> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<U>) {
        let core = Arc::new_cyclic(|me| FlatMapCore {
            me: me.clone(),
            downstream: subscriber,
            f: Arc::clone(&self.f),
            opts: self.opts,
            outer: UpstreamSlot::new(),
            state: Mutex::new(State::default()),
            wip: WorkInProgress::new(),
            _in: PhantomData,
        });
        self.source.subscribe(core);
    }
}

struct Lane<U> {
    id: u64,
    items: VecDeque<U>,
    done: bool,
}

struct State<U> {
    demand: u64,
    queue: VecDeque<U>,
    lanes: VecDeque<Lane<U>>,
    inners: HashMap<u64, SubscriptionRef>,
    active: usize,
    next_id: u64,
    outer_done: bool,
    error: Option<FlowError>,
    terminated: bool,
}

impl<U> Default for State<U> {
    fn default() -> Self {
        Self {
            demand: 0,
            queue: VecDeque::new(),
            lanes: VecDeque::new(),
            inners: HashMap::new(),
            active: 0,
            next_id: 0,
            outer_done: false,
            error: None,
            terminated: false,
        }
    }
}

enum Step<U> {
    Emit(U),
    Fail(FlowError, Vec<SubscriptionRef>),
    Complete,
    Idle,
}

impl<U> State<U> {
    fn record(&mut self, err: FlowError) {
        if self.error.is_none() {
            self.error = Some(err);
        } else {
            tracing::debug!(error = %err, "additional error dropped; first error is kept");
        }
    }

    /// Marks the stage terminated and returns every live inner subscription.
    fn shut(&mut self) -> Vec<SubscriptionRef> {
        self.terminated = true;
        self.queue.clear();
        self.lanes.clear();
        self.inners.drain().map(|(_, s)| s).collect()
    }

    fn pop(&mut self, ordered: bool) -> Option<U> {
        if !ordered {
            return self.queue.pop_front();
        }
        loop {
            let front = self.lanes.front_mut()?;
            if let Some(item) = front.items.pop_front() {
                return Some(item);
            }
            if !front.done {
                return None;
            }
            self.lanes.pop_front();
        }
    }

    fn buffered(&self) -> bool {
        !self.queue.is_empty() || self.lanes.iter().any(|l| !l.items.is_empty())
    }

    fn step(&mut self, opts: FlatMapOptions) -> Step<U> {
        if self.terminated {
            return Step::Idle;
        }
        if !opts.delay_error {
            if let Some(err) = self.error.take() {
                return Step::Fail(err, self.shut());
            }
        }
        if self.demand > 0 {
            if let Some(item) = self.pop(opts.ordered) {
                if self.demand != UNBOUNDED {
                    self.demand -= 1;
                }
                return Step::Emit(item);
            }
        }
        if self.outer_done && self.active == 0 && !self.buffered() {
            self.terminated = true;
            return match self.error.take() {
                Some(err) => Step::Fail(err, Vec::new()),
                None => Step::Complete,
            };
        }
        Step::Idle
    }
}

struct FlatMapCore<T, U, F> {
    me: Weak<FlatMapCore<T, U, F>>,
    downstream: SubscriberRef<U>,
    f: Arc<F>,
    opts: FlatMapOptions,
    outer: UpstreamSlot,
    state: Mutex<State<U>>,
    wip: WorkInProgress,
    _in: PhantomData<fn(T)>,
}

impl<T, U, F> FlatMapCore<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> PublisherRef<U> + Send + Sync + 'static,
{
    fn drain(&self) {
        self.wip.drain(|| {
            loop {
                let step = lock(&self.state).step(self.opts);
                match step {
                    Step::Emit(item) => self.downstream.on_next(item),
                    Step::Fail(err, inners) => {
                        self.outer.cancel();
                        for s in inners {
                            s.cancel();
                        }
                        self.downstream.on_error(err);
                        return;
                    }
                    Step::Complete => {
                        self.downstream.on_complete();
                        return;
                    }
                    Step::Idle => return,
                }
            }
        });
    }

    fn replenish(&self) {
        if self.opts.concurrency as u64 != UNBOUNDED {
            self.outer.request(1);
        }
    }

    fn inner_next(&self, id: u64, item: U) {
        {
            let mut st = lock(&self.state);
            if st.terminated {
                return;
            }
            if self.opts.ordered {
                if let Some(lane) = st.lanes.iter_mut().find(|l| l.id == id) {
                    lane.items.push_back(item);
                }
            } else {
                st.queue.push_back(item);
            }
        }
        self.drain();
    }

    fn inner_done(&self, id: u64, error: Option<FlowError>) {
        let replenish = {
            let mut st = lock(&self.state);
            if st.terminated {
                return;
            }
            st.inners.remove(&id);
            st.active -= 1;
            if let Some(lane) = st.lanes.iter_mut().find(|l| l.id == id) {
                lane.done = true;
            }
            let failed = error.is_some();
            if let Some(err) = error {
                st.record(err);
            }
            !st.outer_done && (!failed || self.opts.delay_error)
        };
        if replenish {
            self.replenish();
        }
        self.drain();
    }
}

impl<T, U, F> Subscriber<T> for FlatMapCore<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> PublisherRef<U> + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if !self.outer.set(Arc::clone(&subscription)) {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.downstream.on_subscribe(me);
        let initial = if self.opts.concurrency as u64 == UNBOUNDED {
            UNBOUNDED
        } else {
            self.opts.concurrency as u64
        };
        subscription.request(initial);
    }

    fn on_next(&self, item: T) {
        if lock(&self.state).terminated {
            return;
        }
        let inner = match guarded(|| (self.f)(item)) {
            Ok(inner) => inner,
            Err(err) => {
                self.outer.cancel();
                {
                    let mut st = lock(&self.state);
                    st.outer_done = true;
                    st.record(err);
                }
                self.drain();
                return;
            }
        };
        let id = {
            let mut st = lock(&self.state);
            if st.terminated {
                return;
            }
            let id = st.next_id;
            st.next_id += 1;
            st.active += 1;
            if self.opts.ordered {
                st.lanes.push_back(Lane {
                    id,
                    items: VecDeque::new(),
                    done: false,
                });
            }
            id
        };
        let Some(core) = self.me.upgrade() else {
            return;
        };
        inner.subscribe(Arc::new(InnerSubscriber { core, id }));
    }

    fn on_error(&self, error: FlowError) {
        {
            let mut st = lock(&self.state);
            if st.terminated || st.outer_done {
                return;
            }
            st.outer_done = true;
            st.record(error);
        }
        self.outer.clear();
        self.drain();
    }

    fn on_complete(&self) {
        {
            let mut st = lock(&self.state);
            if st.terminated || st.outer_done {
                return;
            }
            st.outer_done = true;
        }
        self.outer.clear();
        self.drain();
    }
}

impl<T, U, F> Subscription for FlatMapCore<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> PublisherRef<U> + Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        if let Err(err) = validate_request(n) {
            let inners = {
                let mut st = lock(&self.state);
                if st.terminated {
                    return;
                }
                st.shut()
            };
            self.outer.cancel();
            for s in inners {
                s.cancel();
            }
            self.downstream.on_error(err);
            return;
        }
        {
            let mut st = lock(&self.state);
            st.demand = st.demand.saturating_add(n);
        }
        self.drain();
    }

    fn cancel(&self) {
        let inners = {
            let mut st = lock(&self.state);
            if st.terminated {
                return;
            }
            st.shut()
        };
        self.outer.cancel();
        for s in inners {
            s.cancel();
        }
    }
}

struct InnerSubscriber<T, U, F> {
    core: Arc<FlatMapCore<T, U, F>>,
    id: u64,
}

impl<T, U, F> Subscriber<U> for InnerSubscriber<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> PublisherRef<U> + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        let accepted = {
            let mut st = lock(&self.core.state);
            if st.terminated {
                false
            } else {
                st.inners.insert(self.id, Arc::clone(&subscription));
                true
            }
        };
        if accepted {
            subscription.request(UNBOUNDED);
        } else {
            subscription.cancel();
        }
    }

    fn on_next(&self, item: U) {
        self.core.inner_next(self.id, item);
    }

    fn on_error(&self, error: FlowError) {
        self.core.inner_done(self.id, Some(error));
    }

    fn on_complete(&self) {
        self.core.inner_done(self.id, None);
    }
}
