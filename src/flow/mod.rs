//! # Sequences: [`Flow`] (0..N items) and [`Maybe`] (0..1 item).
//!
//! A sequence is an immutable description of a pipeline. Every operator
//! returns a new sequence wrapping the previous one; nothing runs until a
//! terminal method (`subscribe*`, [`Maybe::block`]) attaches a subscriber.
//! Each subscription is an independent run.
//!
//! ```text
//! Flow::range(1, 3) ─► map ─► filter ─► publish_on(single) ─► subscribe_next(..)
//!        ▲                                                           │
//!        └──────────────── request(n) / cancel() ◄───────────────────┘
//! ```

mod maybe;
pub(crate) mod sources;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::combinators;
use crate::config::Config;
use crate::error::FlowError;
use crate::operators::{
    CollectPublisher, DelaySubscriptionPublisher, DelayedValue, FilterPublisher, FlatMapOptions,
    FlatMapPublisher, Hooks, LogPublisher, MapPublisher, PeekPublisher, PublishOnPublisher,
    ResumePublisher, RetryPublisher, SubscribeOnPublisher, SwitchIfEmptyPublisher, TakePublisher,
    TimeoutPublisher,
};
use crate::policies::BackoffPolicy;
use crate::protocol::{Disposable, LambdaSubscriber, Publisher, PublisherRef, SubscriberRef};
use crate::schedulers::Scheduler;

use sources::{DeferSource, EmptySource, ErrorSource, IterSource, NeverSource};

pub use maybe::Maybe;

/// A sequence of zero or more items followed by completion or an error.
pub struct Flow<T> {
    source: PublisherRef<T>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T: Send + 'static> Flow<T> {
    pub(crate) fn from_arc(source: PublisherRef<T>) -> Self {
        Self { source }
    }

    /// Wraps a hand-written publisher.
    pub fn from_publisher(publisher: impl Publisher<T>) -> Self {
        Self::from_arc(Arc::new(publisher))
    }

    /// The underlying publisher, for custom stages.
    pub fn as_publisher(&self) -> PublisherRef<T> {
        Arc::clone(&self.source)
    }

    // ---- sources ----

    /// Emits `values` in order, then completes.
    ///
    /// # Example
    /// ```
    /// use sluice::{Flow, StepVerifier};
    ///
    /// StepVerifier::create(Flow::just(["a", "b"]))
    ///     .expect_next(["a", "b"])
    ///     .verify_complete()
    ///     .unwrap();
    /// ```
    pub fn just(values: impl Into<Vec<T>>) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_arc(Arc::new(IterSource::new(values.into())))
    }

    /// Emits the items of `items`; the iterable is cloned per subscription.
    #[allow(clippy::should_implement_trait)]
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::from_arc(Arc::new(IterSource::new(items)))
    }

    pub fn empty() -> Self {
        Self::from_arc(Arc::new(EmptySource))
    }

    pub fn error(error: FlowError) -> Self {
        Self::from_arc(Arc::new(ErrorSource { error }))
    }

    /// Never signals anything beyond `on_subscribe`.
    pub fn never() -> Self {
        Self::from_arc(Arc::new(NeverSource))
    }

    /// Calls `factory` at every subscribe and subscribes to what it returns.
    /// A panicking factory yields an error.
    pub fn defer<F>(factory: F) -> Self
    where
        F: Fn() -> Flow<T> + Send + Sync + 'static,
    {
        Self::from_arc(Arc::new(DeferSource::new(move || factory().source)))
    }
}

impl Flow<i32> {
    /// Emits `count` consecutive integers starting at `start`.
    ///
    /// A range reaching past `i32::MAX` fails with `IllegalArgument` on
    /// subscribe.
    pub fn range(start: i32, count: u32) -> Flow<i32> {
        if count == 0 {
            return Flow::empty();
        }
        let last = i64::from(start) + i64::from(count) - 1;
        match i32::try_from(last) {
            Ok(last) => Flow::from_iter(start..=last),
            Err(_) => Flow::error(FlowError::illegal_argument(format!(
                "range({start}, {count}) overflows i32"
            ))),
        }
    }
}

impl<T: Send + 'static> Flow<T> {
    // ---- shaping ----

    pub fn map<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Flow::from_arc(Arc::new(MapPublisher::new(self.as_publisher(), move |item| {
            Ok(f(item))
        })))
    }

    /// Like [`map`](Self::map), but an `Err` terminates the sequence with
    /// that error.
    pub fn try_map<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U, FlowError> + Send + Sync + 'static,
    {
        Flow::from_arc(Arc::new(MapPublisher::new(self.as_publisher(), f)))
    }

    pub fn filter<P>(&self, predicate: P) -> Flow<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Flow::from_arc(Arc::new(FilterPublisher::new(self.as_publisher(), predicate)))
    }

    /// Emits at most `n` items, then cancels upstream and completes.
    pub fn take(&self, n: u64) -> Flow<T> {
        Flow::from_arc(Arc::new(TakePublisher::new(self.as_publisher(), n)))
    }

    /// The first item, if any.
    pub fn next(&self) -> Maybe<T> {
        Maybe::from_arc(Arc::new(TakePublisher::new(self.as_publisher(), 1)))
    }

    /// All items as one vector, emitted on completion.
    pub fn collect_list(&self) -> Maybe<Vec<T>> {
        Maybe::from_arc(Arc::new(CollectPublisher::new(self.as_publisher())))
    }

    // ---- side effects ----

    fn peek(&self, hooks: Hooks<T>) -> Flow<T> {
        Flow::from_arc(Arc::new(PeekPublisher::new(self.as_publisher(), hooks)))
    }

    pub fn do_on_subscribe(&self, f: impl Fn() + Send + Sync + 'static) -> Flow<T> {
        self.peek(Hooks {
            on_subscribe: Some(Box::new(move |()| f())),
            ..Hooks::default()
        })
    }

    pub fn do_on_request(&self, f: impl Fn(u64) + Send + Sync + 'static) -> Flow<T> {
        self.peek(Hooks {
            on_request: Some(Box::new(f)),
            ..Hooks::default()
        })
    }

    pub fn do_on_next(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Flow<T> {
        self.peek(Hooks {
            on_next: Some(Box::new(f)),
            ..Hooks::default()
        })
    }

    pub fn do_on_error(&self, f: impl Fn(&FlowError) + Send + Sync + 'static) -> Flow<T> {
        self.peek(Hooks {
            on_error: Some(Box::new(f)),
            ..Hooks::default()
        })
    }

    pub fn do_on_complete(&self, f: impl Fn() + Send + Sync + 'static) -> Flow<T> {
        self.peek(Hooks {
            on_complete: Some(Box::new(move |()| f())),
            ..Hooks::default()
        })
    }

    pub fn do_on_cancel(&self, f: impl Fn() + Send + Sync + 'static) -> Flow<T> {
        self.peek(Hooks {
            on_cancel: Some(Box::new(move |()| f())),
            ..Hooks::default()
        })
    }

    /// Logs every signal, request and cancel at INFO under `sluice::log`.
    pub fn log(&self) -> Flow<T>
    where
        T: Debug,
    {
        self.log_as("flow")
    }

    pub fn log_as(&self, category: &str) -> Flow<T>
    where
        T: Debug,
    {
        Flow::from_arc(Arc::new(LogPublisher::new(self.as_publisher(), category)))
    }

    // ---- flattening ----

    /// Maps each item to an inner sequence and merges them in arrival order,
    /// with [`Config::flat_map_concurrency`] inner sequences at most.
    pub fn flat_map<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        self.flat_map_with(f, Config::global().flat_map_concurrency_clamped())
    }

    pub fn flat_map_with<U, F>(&self, f: F, concurrency: usize) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        self.flat_map_engine(
            f,
            FlatMapOptions {
                concurrency,
                ordered: false,
                delay_error: false,
            },
        )
    }

    /// Subscribes inner sequences eagerly but emits them in outer order.
    pub fn flat_map_sequential<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        self.flat_map_engine(
            f,
            FlatMapOptions {
                concurrency: Config::global().flat_map_concurrency_clamped(),
                ordered: true,
                delay_error: false,
            },
        )
    }

    fn flat_map_engine<U, F>(&self, f: F, opts: FlatMapOptions) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        Flow::from_arc(Arc::new(FlatMapPublisher::new(
            self.as_publisher(),
            move |item| f(item).source,
            opts,
        )))
    }

    // ---- fallbacks ----

    /// Subscribes `fallback` when this sequence completes without items.
    pub fn switch_if_empty(&self, fallback: Flow<T>) -> Flow<T> {
        Flow::from_arc(Arc::new(SwitchIfEmptyPublisher::new(
            self.as_publisher(),
            fallback.source,
        )))
    }

    /// Replaces an error with the sequence `f` builds from it.
    pub fn on_error_resume<F>(&self, f: F) -> Flow<T>
    where
        F: Fn(FlowError) -> Flow<T> + Send + Sync + 'static,
    {
        Flow::from_arc(Arc::new(ResumePublisher::new(
            self.as_publisher(),
            move |err| f(err).source,
        )))
    }

    /// Replaces an error with `value` followed by completion.
    pub fn on_error_return(&self, value: T) -> Flow<T>
    where
        T: Clone + Sync,
    {
        self.on_error_resume(move |_| Flow::just([value.clone()]))
    }

    /// Resubscribes after an error, up to `max_retries` times.
    ///
    /// When the budget is spent the sequence fails with
    /// [`FlowError::RetryExhausted`] carrying the last error.
    pub fn retry(&self, max_retries: u32) -> Flow<T> {
        Flow::from_arc(Arc::new(RetryPublisher::immediate(
            self.as_publisher(),
            max_retries,
        )))
    }

    /// Like [`retry`](Self::retry), waiting `policy.next(attempt)` on the
    /// `parallel` scheduler before each resubscription.
    pub fn retry_backoff(&self, policy: BackoffPolicy) -> Flow<T> {
        Flow::from_arc(Arc::new(RetryPublisher::with_backoff(
            self.as_publisher(),
            policy,
        )))
    }

    // ---- time ----

    /// Fails with [`FlowError::Timeout`] if nothing arrives within `timeout`
    /// of subscription or of the previous item.
    pub fn timeout(&self, timeout: Duration) -> Flow<T> {
        Flow::from_arc(Arc::new(TimeoutPublisher::new(self.as_publisher(), timeout)))
    }

    /// Shifts every item by `delay`; items stay in order.
    pub fn delay_elements(&self, delay: Duration) -> Flow<T> {
        Flow::from_arc(Arc::new(FlatMapPublisher::new(
            self.as_publisher(),
            move |item| -> PublisherRef<T> { Arc::new(DelayedValue::new(item, delay)) },
            FlatMapOptions {
                concurrency: 1,
                ordered: true,
                delay_error: false,
            },
        )))
    }

    /// Subscribes upstream `delay` after this sequence is subscribed.
    pub fn delay_subscription(&self, delay: Duration) -> Flow<T> {
        Flow::from_arc(Arc::new(DelaySubscriptionPublisher::new(
            self.as_publisher(),
            delay,
        )))
    }

    // ---- scheduling ----

    /// Subscribes upstream (and so runs its generation) on a worker of
    /// `scheduler`.
    pub fn subscribe_on(&self, scheduler: &Scheduler) -> Flow<T> {
        Flow::from_arc(Arc::new(SubscribeOnPublisher::new(
            self.as_publisher(),
            scheduler.clone(),
        )))
    }

    /// Delivers downstream signals on a worker of `scheduler`, buffering up
    /// to [`Config::prefetch`] items.
    pub fn publish_on(&self, scheduler: &Scheduler) -> Flow<T> {
        Flow::from_arc(Arc::new(PublishOnPublisher::new(
            self.as_publisher(),
            scheduler.clone(),
            Config::global().prefetch_clamped(),
        )))
    }

    // ---- pairwise combinators ----

    pub fn concat_with(&self, other: Flow<T>) -> Flow<T> {
        combinators::concat(vec![self.clone(), other])
    }

    pub fn merge_with(&self, other: Flow<T>) -> Flow<T> {
        combinators::merge(vec![self.clone(), other])
    }

    pub fn zip_with<U, R, F>(&self, other: Flow<U>, combiner: F) -> Flow<R>
    where
        U: Send + 'static,
        R: Send + 'static,
        F: Fn(T, U) -> R + Send + Sync + 'static,
    {
        combinators::zip2(self.clone(), other, combiner)
    }

    // ---- terminal ----

    /// Requests everything and ignores the items. Errors are logged.
    pub fn subscribe(&self) -> Disposable {
        self.subscribe_lambda(None, None, None)
    }

    pub fn subscribe_next(&self, next: impl Fn(T) + Send + Sync + 'static) -> Disposable {
        self.subscribe_lambda(Some(Box::new(next)), None, None)
    }

    pub fn subscribe_all(
        &self,
        next: impl Fn(T) + Send + Sync + 'static,
        error: impl Fn(FlowError) + Send + Sync + 'static,
        complete: impl Fn() + Send + Sync + 'static,
    ) -> Disposable {
        self.subscribe_lambda(
            Some(Box::new(next)),
            Some(Box::new(error)),
            Some(Box::new(complete)),
        )
    }

    /// Attaches a hand-written subscriber.
    pub fn subscribe_with(&self, subscriber: SubscriberRef<T>) {
        self.source.subscribe(subscriber);
    }

    #[allow(clippy::type_complexity)]
    fn subscribe_lambda(
        &self,
        next: Option<Box<dyn Fn(T) + Send + Sync>>,
        error: Option<Box<dyn Fn(FlowError) + Send + Sync>>,
        complete: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> Disposable {
        let subscriber = LambdaSubscriber::new(next, error, complete);
        self.source.subscribe(subscriber.clone());
        Disposable::new(subscriber)
    }
}

impl<T: Send + 'static> From<Maybe<T>> for Flow<T> {
    fn from(maybe: Maybe<T>) -> Self {
        maybe.into_flow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn collect<T: Send + 'static>(flow: &Flow<T>) -> (Arc<Mutex<Vec<T>>>, Arc<AtomicBool>) {
        let items = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicBool::new(false));
        let (sink, flag) = (Arc::clone(&items), Arc::clone(&done));
        flow.subscribe_all(
            move |v| sink.lock().unwrap().push(v),
            |e| panic!("unexpected error: {e}"),
            move || flag.store(true, Ordering::SeqCst),
        );
        (items, done)
    }

    #[test]
    fn map_filter_take_chain_synchronously() {
        let flow = Flow::from_iter(1..=10)
            .map(|x| x * 3)
            .filter(|x| x % 2 == 0)
            .take(2);
        let (items, done) = collect(&flow);
        assert_eq!(*items.lock().unwrap(), vec![6, 12]);
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn each_subscription_is_independent() {
        let flow = Flow::just([1, 2]).map(|x| x + 1);
        let (first, _) = collect(&flow);
        let (second, _) = collect(&flow);
        assert_eq!(*first.lock().unwrap(), vec![2, 3]);
        assert_eq!(*second.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn concat_with_and_on_error_return() {
        let flow = Flow::just([1])
            .concat_with(Flow::error(FlowError::upstream("boom")))
            .on_error_return(-1);
        let (items, done) = collect(&flow);
        assert_eq!(*items.lock().unwrap(), vec![1, -1]);
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn defer_builds_per_subscription() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let flow = Flow::defer(move || {
            let mut n = counter.lock().unwrap();
            *n += 1;
            Flow::just([*n])
        });
        let (a, _) = collect(&flow);
        let (b, _) = collect(&flow);
        assert_eq!(*a.lock().unwrap(), vec![1]);
        assert_eq!(*b.lock().unwrap(), vec![2]);
    }
}
