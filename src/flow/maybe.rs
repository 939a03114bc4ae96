//! [`Maybe`]: a sequence of at most one item.

use std::fmt::Debug;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::error::FlowError;
use crate::operators::{
    DelaySubscriptionPublisher, DelayedValue, FilterPublisher, FlatMapOptions, FlatMapPublisher,
    Hooks, LogPublisher, MapPublisher, PeekPublisher, PublishOnPublisher, ResumePublisher,
    RetryPublisher, SubscribeOnPublisher, SuccessPublisher, SwitchIfEmptyPublisher,
    TimeoutPublisher,
};
use crate::policies::BackoffPolicy;
use crate::protocol::{Disposable, LambdaSubscriber, PublisherRef, SubscriberRef, lock};
use crate::schedulers::{Scheduler, current_kind};

use super::Flow;
use super::sources::{
    CallableSource, DeferSource, EmptySource, ErrorSource, IterSource, NeverSource,
};

/// A sequence that emits at most one item, then completes or fails.
pub struct Maybe<T> {
    source: PublisherRef<T>,
}

impl<T> Clone for Maybe<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

const SINGLE: FlatMapOptions = FlatMapOptions {
    concurrency: 1,
    ordered: true,
    delay_error: false,
};

impl<T: Send + 'static> Maybe<T> {
    /// Only for publishers that emit at most one item.
    pub(crate) fn from_arc(source: PublisherRef<T>) -> Self {
        Self { source }
    }

    pub fn as_publisher(&self) -> PublisherRef<T> {
        Arc::clone(&self.source)
    }

    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_arc(Arc::new(IterSource::new(Some(value))))
    }

    pub fn empty() -> Self {
        Self::from_arc(Arc::new(EmptySource))
    }

    pub fn error(error: FlowError) -> Self {
        Self::from_arc(Arc::new(ErrorSource { error }))
    }

    pub fn never() -> Self {
        Self::from_arc(Arc::new(NeverSource))
    }

    /// Emits the result of `f`, computed on the first request and on
    /// whichever thread performs it. `Err` or a panic becomes the error
    /// signal.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use sluice::Maybe;
    ///
    /// let answer = Maybe::from_callable(|| Ok(6 * 7));
    /// assert_eq!(answer.block(Duration::from_secs(1)).unwrap(), Some(42));
    /// ```
    pub fn from_callable<F>(f: F) -> Self
    where
        F: Fn() -> Result<T, FlowError> + Send + Sync + 'static,
    {
        Self::from_arc(Arc::new(CallableSource::new(move || f().map(Some))))
    }

    pub fn defer<F>(factory: F) -> Self
    where
        F: Fn() -> Maybe<T> + Send + Sync + 'static,
    {
        Self::from_arc(Arc::new(DeferSource::new(move || factory().source)))
    }

    pub fn map<U, F>(&self, f: F) -> Maybe<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Maybe::from_arc(Arc::new(MapPublisher::new(self.as_publisher(), move |v| {
            Ok(f(v))
        })))
    }

    pub fn try_map<U, F>(&self, f: F) -> Maybe<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U, FlowError> + Send + Sync + 'static,
    {
        Maybe::from_arc(Arc::new(MapPublisher::new(self.as_publisher(), f)))
    }

    pub fn filter<P>(&self, predicate: P) -> Maybe<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Maybe::from_arc(Arc::new(FilterPublisher::new(self.as_publisher(), predicate)))
    }

    /// Chains a dependent single-value step.
    pub fn flat_map<U, F>(&self, f: F) -> Maybe<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Maybe<U> + Send + Sync + 'static,
    {
        Maybe::from_arc(Arc::new(FlatMapPublisher::new(
            self.as_publisher(),
            move |v| f(v).source,
            SINGLE,
        )))
    }

    /// Expands the value into a multi-item sequence.
    pub fn flat_map_many<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        Flow::from_arc(Arc::new(FlatMapPublisher::new(
            self.as_publisher(),
            move |v| f(v).as_publisher(),
            SINGLE,
        )))
    }

    fn peek(&self, hooks: Hooks<T>) -> Maybe<T> {
        Maybe::from_arc(Arc::new(PeekPublisher::new(self.as_publisher(), hooks)))
    }

    pub fn do_on_subscribe(&self, f: impl Fn() + Send + Sync + 'static) -> Maybe<T> {
        self.peek(Hooks {
            on_subscribe: Some(Box::new(move |()| f())),
            ..Hooks::default()
        })
    }

    pub fn do_on_request(&self, f: impl Fn(u64) + Send + Sync + 'static) -> Maybe<T> {
        self.peek(Hooks {
            on_request: Some(Box::new(f)),
            ..Hooks::default()
        })
    }

    pub fn do_on_next(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Maybe<T> {
        self.peek(Hooks {
            on_next: Some(Box::new(f)),
            ..Hooks::default()
        })
    }

    pub fn do_on_error(&self, f: impl Fn(&FlowError) + Send + Sync + 'static) -> Maybe<T> {
        self.peek(Hooks {
            on_error: Some(Box::new(f)),
            ..Hooks::default()
        })
    }

    pub fn do_on_complete(&self, f: impl Fn() + Send + Sync + 'static) -> Maybe<T> {
        self.peek(Hooks {
            on_complete: Some(Box::new(move |()| f())),
            ..Hooks::default()
        })
    }

    pub fn do_on_cancel(&self, f: impl Fn() + Send + Sync + 'static) -> Maybe<T> {
        self.peek(Hooks {
            on_cancel: Some(Box::new(move |()| f())),
            ..Hooks::default()
        })
    }

    /// Runs `f` once with the value, or with `None` when the sequence
    /// completes empty. Not called on error.
    pub fn do_on_success(&self, f: impl Fn(Option<&T>) + Send + Sync + 'static) -> Maybe<T> {
        Maybe::from_arc(Arc::new(SuccessPublisher::new(self.as_publisher(), f)))
    }

    pub fn log(&self) -> Maybe<T>
    where
        T: Debug,
    {
        self.log_as("maybe")
    }

    pub fn log_as(&self, category: &str) -> Maybe<T>
    where
        T: Debug,
    {
        Maybe::from_arc(Arc::new(LogPublisher::new(self.as_publisher(), category)))
    }

    pub fn switch_if_empty(&self, fallback: Maybe<T>) -> Maybe<T> {
        Maybe::from_arc(Arc::new(SwitchIfEmptyPublisher::new(
            self.as_publisher(),
            fallback.source,
        )))
    }

    pub fn on_error_resume<F>(&self, f: F) -> Maybe<T>
    where
        F: Fn(FlowError) -> Maybe<T> + Send + Sync + 'static,
    {
        Maybe::from_arc(Arc::new(ResumePublisher::new(
            self.as_publisher(),
            move |err| f(err).source,
        )))
    }

    pub fn on_error_return(&self, value: T) -> Maybe<T>
    where
        T: Clone + Sync,
    {
        self.on_error_resume(move |_| Maybe::just(value.clone()))
    }

    pub fn retry(&self, max_retries: u32) -> Maybe<T> {
        Maybe::from_arc(Arc::new(RetryPublisher::immediate(
            self.as_publisher(),
            max_retries,
        )))
    }

    pub fn retry_backoff(&self, policy: BackoffPolicy) -> Maybe<T> {
        Maybe::from_arc(Arc::new(RetryPublisher::with_backoff(
            self.as_publisher(),
            policy,
        )))
    }

    pub fn timeout(&self, timeout: Duration) -> Maybe<T> {
        Maybe::from_arc(Arc::new(TimeoutPublisher::new(self.as_publisher(), timeout)))
    }

    /// Releases the value `delay` after it arrived. An empty or failing
    /// sequence is not delayed.
    pub fn delay_element(&self, delay: Duration) -> Maybe<T> {
        Maybe::from_arc(Arc::new(FlatMapPublisher::new(
            self.as_publisher(),
            move |v| -> PublisherRef<T> { Arc::new(DelayedValue::new(v, delay)) },
            SINGLE,
        )))
    }

    pub fn delay_subscription(&self, delay: Duration) -> Maybe<T> {
        Maybe::from_arc(Arc::new(DelaySubscriptionPublisher::new(
            self.as_publisher(),
            delay,
        )))
    }

    pub fn subscribe_on(&self, scheduler: &Scheduler) -> Maybe<T> {
        Maybe::from_arc(Arc::new(SubscribeOnPublisher::new(
            self.as_publisher(),
            scheduler.clone(),
        )))
    }

    pub fn publish_on(&self, scheduler: &Scheduler) -> Maybe<T> {
        Maybe::from_arc(Arc::new(PublishOnPublisher::new(
            self.as_publisher(),
            scheduler.clone(),
            Config::global().prefetch_clamped(),
        )))
    }

    pub fn into_flow(self) -> Flow<T> {
        Flow::from_arc(self.source)
    }

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

    /// Subscribes and waits up to `timeout` for the outcome: `Ok(Some(v))`
    /// for a value, `Ok(None)` for empty completion.
    ///
    /// # Errors
    /// - the sequence's own error;
    /// - [`FlowError::Timeout`] when `timeout` elapses first (the
    ///   subscription is cancelled);
    /// - `IllegalState` when called from a `single` or `parallel` worker,
    ///   which must never block.
    pub fn block(&self, timeout: Duration) -> Result<Option<T>, FlowError> {
        if let Some(kind) = current_kind() {
            if !kind.is_blocking_tolerant() {
                return Err(FlowError::illegal_state(format!(
                    "block() is not allowed on a `{kind}` worker"
                )));
            }
        }

        let (tx, rx) = mpsc::channel::<Result<Option<T>, FlowError>>();
        let value: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let (tx_error, tx_complete) = (tx.clone(), tx);
        let (slot_next, slot_complete) = (Arc::clone(&value), value);

        let subscription = self.subscribe_all(
            move |v| *lock(&slot_next) = Some(v),
            move |err| {
                let _ = tx_error.send(Err(err));
            },
            move || {
                let _ = tx_complete.send(Ok(lock(&slot_complete).take()));
            },
        );

        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                subscription.dispose();
                Err(FlowError::Timeout { timeout })
            }
            Err(RecvTimeoutError::Disconnected) => Err(FlowError::illegal_state(
                "subscriber dropped before a terminal signal",
            )),
        }
    }
}
