mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{WAIT, init_tracing};
use sluice::{ErrorKind, Flow, FlowError, Scheduler, StepVerifier, UNBOUNDED, zip2};

/// Wraps `flow` so every upstream request is recorded.
fn recording(flow: Flow<i32>) -> (Flow<i32>, Arc<Mutex<Vec<u64>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&requests);
    let flow = flow.do_on_request(move |n| sink.lock().unwrap().push(n));
    (flow, requests)
}

#[test]
fn items_never_exceed_requested_demand() -> anyhow::Result<()> {
    init_tracing();
    StepVerifier::with_initial_request(Flow::range(1, 10), 2)
        .expect_next([1, 2])
        .expect_no_event(Duration::from_millis(30))
        .then_request(3)
        .expect_next([3, 4, 5])
        .expect_no_event(Duration::from_millis(30))
        .then_request(UNBOUNDED)
        .expect_next_count(5)
        .expect_complete()
        .verify_timeout(WAIT)?;
    Ok(())
}

#[test]
fn nothing_flows_without_a_request() -> anyhow::Result<()> {
    StepVerifier::with_initial_request(Flow::just([7, 8]), 0)
        .expect_subscription()
        .expect_no_event(Duration::from_millis(30))
        .then_request(1)
        .expect_next([7])
        .then_request(1)
        .expect_next([8])
        .expect_complete()
        .verify()?;
    Ok(())
}

#[test]
fn request_zero_is_an_illegal_argument() -> anyhow::Result<()> {
    StepVerifier::with_initial_request(Flow::range(1, 3), 0)
        .then_request(0)
        .expect_error_matches(|e| matches!(e, FlowError::IllegalArgument { .. }))
        .verify()?;

    StepVerifier::with_initial_request(Flow::range(1, 3).map(|x| x + 1), 0)
        .then_request(0)
        .expect_error_kind(ErrorKind::IllegalArgument)
        .verify()?;
    Ok(())
}

#[test]
fn request_zero_through_publish_on_reports_the_error() -> anyhow::Result<()> {
    StepVerifier::with_initial_request(Flow::range(1, 3).publish_on(&Scheduler::single()), 0)
        .then_request(0)
        .expect_error_kind(ErrorKind::IllegalArgument)
        .verify_timeout(WAIT)?;
    Ok(())
}

#[test]
fn filter_replenishes_dropped_items() -> anyhow::Result<()> {
    let (source, requests) = recording(Flow::range(1, 6));
    StepVerifier::with_initial_request(source.filter(|x| x % 3 == 0), 1)
        .expect_next([3])
        .expect_no_event(Duration::from_millis(20))
        .then_request(1)
        .expect_next([6])
        .expect_complete()
        .verify()?;
    // one initial request plus one per rejected item and one per then_request
    let requests = requests.lock().unwrap().clone();
    assert!(requests.iter().all(|n| *n == 1), "{requests:?}");
    Ok(())
}

#[test]
fn publish_on_bounds_upstream_demand() -> anyhow::Result<()> {
    let (source, requests) = recording(Flow::range(1, 100));
    StepVerifier::create(source.publish_on(&Scheduler::parallel()))
        .expect_next_count(100)
        .expect_complete()
        .verify_timeout(WAIT)?;

    let requests = requests.lock().unwrap().clone();
    assert_eq!(requests.first(), Some(&32));
    assert!(requests.iter().all(|n| *n <= 32), "{requests:?}");
    assert!(requests.iter().sum::<u64>() >= 100);
    Ok(())
}

#[test]
fn publish_on_holds_items_until_downstream_asks() -> anyhow::Result<()> {
    StepVerifier::with_initial_request(Flow::range(1, 5).publish_on(&Scheduler::single()), 1)
        .expect_next([1])
        .expect_no_event(Duration::from_millis(30))
        .then_request(2)
        .expect_next([2, 3])
        .then_request(10)
        .expect_next([4, 5])
        .expect_complete()
        .verify_timeout(WAIT)?;
    Ok(())
}

#[test]
fn zip_prefetches_instead_of_requesting_everything() -> anyhow::Result<()> {
    let (long, requests) = recording(Flow::range(1, 1_000));
    let zipped = zip2(long, Flow::range(1, 3), |a, b| a * b);
    StepVerifier::create(zipped)
        .expect_next([1, 4, 9])
        .expect_complete()
        .verify_timeout(WAIT)?;

    let requests = requests.lock().unwrap().clone();
    assert!(!requests.contains(&UNBOUNDED), "{requests:?}");
    assert!(requests.iter().sum::<u64>() < 1_000);
    Ok(())
}

#[test]
fn take_limits_an_unbounded_request() -> anyhow::Result<()> {
    let (source, requests) = recording(Flow::range(1, 1_000));
    StepVerifier::create(source.take(3))
        .expect_next([1, 2, 3])
        .expect_complete()
        .verify()?;
    assert_eq!(requests.lock().unwrap().as_slice(), &[3]);
    Ok(())
}
