mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{WAIT, eventually, init_tracing};
use sluice::{
    BackoffPolicy, EmptySubscription, Flow, FlowError, Maybe, Publisher, Scheduler,
    SchedulerKind, StepVerifier, Subscriber, SubscriberRef, SubscriptionRef, UNBOUNDED,
    combine_latest2, concat, merge, zip2,
};

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (Arc::clone(&count), count)
}

/// Requests everything and cancels from inside its first `on_next`.
#[derive(Default)]
struct CancelOnFirst {
    upstream: Mutex<Option<SubscriptionRef>>,
    seen: AtomicUsize,
    errors: AtomicUsize,
    completes: AtomicUsize,
}

impl CancelOnFirst {
    fn cancel(&self) {
        let upstream = self.upstream.lock().unwrap().take();
        if let Some(s) = upstream {
            s.cancel();
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for CancelOnFirst {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        *self.upstream.lock().unwrap() = Some(subscription.clone());
        subscription.request(UNBOUNDED);
    }

    fn on_next(&self, _item: T) {
        if self.seen.fetch_add(1, Ordering::SeqCst) == 0 {
            self.cancel();
        }
    }

    fn on_error(&self, _error: FlowError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_complete(&self) {
        self.completes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Subscribes a [`CancelOnFirst`] and checks nothing follows the first item.
fn assert_silent_after_first<T: Send + 'static>(name: &str, flow: Flow<T>) {
    let subscriber = Arc::new(CancelOnFirst::default());
    flow.subscribe_with(subscriber.clone());
    assert!(
        eventually(|| subscriber.seen.load(Ordering::SeqCst) >= 1),
        "{name}: no item arrived"
    );
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(subscriber.seen.load(Ordering::SeqCst), 1, "{name}: items after cancel");
    assert_eq!(subscriber.errors.load(Ordering::SeqCst), 0, "{name}: error after cancel");
    assert_eq!(subscriber.completes.load(Ordering::SeqCst), 0, "{name}: complete after cancel");
}

#[test]
fn cancelling_inside_on_next_silences_synchronous_sources() {
    init_tracing();
    assert_silent_after_first("range", Flow::range(1, 1_000));
    assert_silent_after_first("filter", Flow::range(1, 1_000).filter(|x| x % 2 == 0));
    assert_silent_after_first("take", Flow::range(1, 1_000).take(5));
    assert_silent_after_first("retry", Flow::range(1, 1_000).retry(3));
    assert_silent_after_first(
        "switch_if_empty",
        Flow::<i32>::empty().switch_if_empty(Flow::range(1, 1_000)),
    );
    assert_silent_after_first(
        "on_error_resume",
        Flow::<i32>::error(FlowError::upstream("boom")).on_error_resume(|_| Flow::range(1, 1_000)),
    );
}

#[test]
fn cancelling_inside_on_next_silences_scheduled_sources() {
    assert_silent_after_first(
        "publish_on",
        Flow::range(1, 1_000).publish_on(&Scheduler::single()),
    );
    assert_silent_after_first(
        "subscribe_on",
        Flow::range(1, 1_000).subscribe_on(&Scheduler::bounded_elastic()),
    );
    assert_silent_after_first(
        "delay_elements",
        Flow::range(1, 50).delay_elements(Duration::from_millis(5)),
    );
    assert_silent_after_first(
        "delay_subscription",
        Flow::range(1, 50).delay_subscription(Duration::from_millis(5)),
    );
    // the timeout would fire well inside the quiet window if left armed
    assert_silent_after_first(
        "timeout",
        Flow::range(1, 1_000).timeout(Duration::from_millis(30)),
    );
}

#[test]
fn cancelling_inside_on_next_silences_combinators() {
    assert_silent_after_first(
        "flat_map",
        Flow::range(1, 100).flat_map(|x| Flow::just([x, x + 1])),
    );
    assert_silent_after_first(
        "concat",
        concat(vec![Flow::range(1, 10), Flow::range(11, 10)]),
    );
    assert_silent_after_first(
        "merge",
        merge(vec![Flow::range(1, 100), Flow::range(101, 100)]),
    );
    assert_silent_after_first(
        "zip",
        zip2(Flow::range(1, 100), Flow::range(1, 100), |a, b| a + b),
    );
    assert_silent_after_first(
        "combine_latest",
        combine_latest2(Flow::just([0]), Flow::range(1, 100), |a, b| a + b),
    );
}

/// Hands out its subscription and keeps the subscriber for later signals.
#[derive(Clone, Default)]
struct Captured {
    subscriber: Arc<Mutex<Option<SubscriberRef<i32>>>>,
}

impl Publisher<i32> for Captured {
    fn subscribe(&self, subscriber: SubscriberRef<i32>) {
        subscriber.on_subscribe(EmptySubscription::shared());
        *self.subscriber.lock().unwrap() = Some(subscriber);
    }
}

#[test]
fn on_error_resume_drops_errors_after_cancel() {
    let source = Captured::default();
    let (built, hook) = counter();
    let flow = Flow::from_publisher(source.clone()).on_error_resume(move |_| {
        hook.fetch_add(1, Ordering::SeqCst);
        Flow::just([0])
    });
    let subscriber = Arc::new(CancelOnFirst::default());
    flow.subscribe_with(subscriber.clone());
    subscriber.cancel();

    let upstream = source.subscriber.lock().unwrap().take();
    upstream
        .expect("source was subscribed")
        .on_error(FlowError::upstream("late"));

    assert_eq!(subscriber.errors.load(Ordering::SeqCst), 0);
    assert_eq!(subscriber.seen.load(Ordering::SeqCst), 0);
    assert_eq!(built.load(Ordering::SeqCst), 0);
}

#[test]
fn then_cancel_reaches_the_source() -> anyhow::Result<()> {
    init_tracing();
    let (cancels, hook) = counter();
    let flow = Flow::range(1, 100).do_on_cancel(move || {
        hook.fetch_add(1, Ordering::SeqCst);
    });
    StepVerifier::with_initial_request(flow, 2)
        .expect_next([1, 2])
        .then_cancel()
        .verify()?;
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn disposing_stops_delivery() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let (cancels, hook) = counter();
    let subscription = Flow::range(1, 1_000)
        .delay_elements(Duration::from_millis(10))
        .do_on_cancel(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
        .subscribe_next(move |x| sink.lock().unwrap().push(x));

    assert!(eventually(|| !seen.lock().unwrap().is_empty()));
    subscription.dispose();
    assert!(subscription.is_disposed());
    let frozen = seen.lock().unwrap().len();

    std::thread::sleep(Duration::from_millis(60));
    assert!(seen.lock().unwrap().len() <= frozen + 1);
    assert_eq!(cancels.load(Ordering::SeqCst), 1);

    // a second dispose is a no-op
    subscription.dispose();
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn take_cancels_upstream_once_satisfied() -> anyhow::Result<()> {
    let (cancels, hook) = counter();
    let (completes, done) = counter();
    let flow = Flow::range(1, 10)
        .do_on_cancel(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
        .do_on_complete(move || {
            done.fetch_add(1, Ordering::SeqCst);
        })
        .take(2);
    StepVerifier::create(flow)
        .expect_next([1, 2])
        .expect_complete()
        .verify()?;
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    assert_eq!(completes.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn next_cancels_an_infinite_looking_source() -> anyhow::Result<()> {
    let (cancels, hook) = counter();
    let first = Flow::range(1, 1_000_000)
        .do_on_cancel(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
        .next()
        .block(WAIT)?;
    assert_eq!(first, Some(1));
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn cancelling_publish_on_releases_its_worker() -> anyhow::Result<()> {
    let scheduler = Scheduler::builder(SchedulerKind::Single).build()?;
    let (cancels, hook) = counter();
    let flow = Flow::<i32>::never()
        .do_on_cancel(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
        .publish_on(&scheduler);

    StepVerifier::create(flow)
        .expect_no_event(Duration::from_millis(20))
        .then_cancel()
        .verify()?;
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    assert!(eventually(|| scheduler.active_workers() == 0));
    scheduler.dispose();
    Ok(())
}

#[test]
fn cancelling_subscribe_on_reaches_the_source_on_the_worker() -> anyhow::Result<()> {
    let scheduler = Scheduler::builder(SchedulerKind::BoundedElastic).build()?;
    let (cancels, hook) = counter();
    let flow = Flow::<i32>::never()
        .do_on_cancel(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
        .subscribe_on(&scheduler);

    let subscription = flow.subscribe();
    assert!(eventually(|| scheduler.active_workers() == 1));
    std::thread::sleep(Duration::from_millis(20));
    subscription.dispose();

    assert!(eventually(|| cancels.load(Ordering::SeqCst) == 1));
    assert!(eventually(|| scheduler.active_workers() == 0));
    scheduler.dispose();
    Ok(())
}

#[test]
fn cancel_stops_pending_delays_and_retries() -> anyhow::Result<()> {
    let (subscriptions, hook) = counter();
    let flaky = Maybe::<i32>::error(FlowError::upstream("boom"))
        .do_on_subscribe(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
        .retry_backoff(BackoffPolicy::fixed(10, Duration::from_millis(50)));

    let subscription = flaky.subscribe();
    assert!(eventually(|| subscriptions.load(Ordering::SeqCst) >= 1));
    subscription.dispose();
    let after = subscriptions.load(Ordering::SeqCst);

    std::thread::sleep(Duration::from_millis(150));
    assert!(subscriptions.load(Ordering::SeqCst) <= after + 1);
    Ok(())
}

#[test]
fn cancel_reaches_every_merged_source() -> anyhow::Result<()> {
    let (cancels, hook) = counter();
    let make = || {
        let hook = Arc::clone(&hook);
        Flow::<i32>::never().do_on_cancel(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
    };
    let merged = merge(vec![make(), make(), make()]);
    StepVerifier::create(merged)
        .expect_no_event(Duration::from_millis(10))
        .then_cancel()
        .verify()?;
    assert_eq!(cancels.load(Ordering::SeqCst), 3);
    Ok(())
}
