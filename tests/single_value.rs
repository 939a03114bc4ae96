mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use common::{WAIT, init_tracing};
use sluice::schedulers::current_context;
use sluice::{ErrorKind, Flow, FlowError, Maybe, Scheduler, StepVerifier};

#[test]
fn just_emits_one_value_then_completes() -> anyhow::Result<()> {
    init_tracing();
    StepVerifier::create(Maybe::just("hello"))
        .expect_subscription()
        .expect_next(["hello"])
        .expect_complete()
        .verify_timeout(WAIT)?;
    Ok(())
}

#[test]
fn empty_and_error_sources() -> anyhow::Result<()> {
    StepVerifier::create(Maybe::<u8>::empty()).verify_complete()?;
    StepVerifier::create(Maybe::<u8>::error(FlowError::upstream("down")))
        .expect_error_matches(|e| e.as_message() == "error: down")
        .verify()?;
    Ok(())
}

#[test]
fn from_callable_runs_on_the_requesting_context() -> anyhow::Result<()> {
    init_tracing();
    let value = Maybe::from_callable(|| Ok(current_context()))
        .subscribe_on(&Scheduler::bounded_elastic())
        .block(WAIT)?;
    assert_eq!(value, Some(Some("boundedElastic")));
    Ok(())
}

#[test]
fn from_callable_is_lazy_and_runs_per_subscription() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let maybe = Maybe::from_callable(move || Ok(counter.fetch_add(1, Ordering::SeqCst)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(maybe.block(WAIT)?, Some(0));
    assert_eq!(maybe.block(WAIT)?, Some(1));
    Ok(())
}

#[test]
fn switch_if_empty_only_for_empty_sources() -> anyhow::Result<()> {
    let fallback = Maybe::just(2);
    assert_eq!(Maybe::empty().switch_if_empty(fallback.clone()).block(WAIT)?, Some(2));
    assert_eq!(Maybe::just(1).switch_if_empty(fallback).block(WAIT)?, Some(1));
    Ok(())
}

#[test]
fn on_error_return_absorbs_before_a_later_resume() -> anyhow::Result<()> {
    let resumed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&resumed);
    let value = Maybe::<i32>::error(FlowError::upstream("x"))
        .on_error_return(1)
        .on_error_resume(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Maybe::just(2)
        })
        .block(WAIT)?;
    assert_eq!(value, Some(1));
    assert_eq!(resumed.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn filter_turns_a_rejected_value_into_empty() -> anyhow::Result<()> {
    StepVerifier::create(Maybe::just(3).filter(|v| *v > 5)).verify_complete()?;
    Ok(())
}

#[test]
fn flat_map_many_expands_into_a_flow() -> anyhow::Result<()> {
    StepVerifier::create(Maybe::just(3).flat_map_many(|n| Flow::range(0, n as u32)))
        .expect_next([0, 1, 2])
        .verify_complete()?;
    Ok(())
}

#[test]
fn block_times_out_and_reports_it() {
    let err = Maybe::<i32>::never()
        .block(Duration::from_millis(30))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[test]
fn block_is_rejected_on_non_blocking_workers() {
    let (tx, rx) = mpsc::channel();
    Scheduler::parallel().schedule(move || {
        let _ = tx.send(Maybe::just(1).block(WAIT));
    });
    let outcome = rx.recv_timeout(WAIT).expect("job ran");
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::IllegalState);
}

#[test]
fn delay_element_shifts_the_value() -> anyhow::Result<()> {
    let started = std::time::Instant::now();
    let value = Maybe::just(5)
        .delay_element(Duration::from_millis(40))
        .block(WAIT)?;
    assert_eq!(value, Some(5));
    assert!(started.elapsed() >= Duration::from_millis(40));
    Ok(())
}

#[test]
fn timeout_fails_a_silent_maybe() -> anyhow::Result<()> {
    StepVerifier::create(Maybe::<i32>::never().timeout(Duration::from_millis(30)))
        .expect_error_kind(ErrorKind::Timeout)
        .verify_timeout(WAIT)?;
    Ok(())
}

#[test]
fn defer_builds_a_fresh_maybe_each_time() -> anyhow::Result<()> {
    let n = Arc::new(AtomicUsize::new(10));
    let src = Arc::clone(&n);
    let maybe = Maybe::defer(move || Maybe::just(src.fetch_add(1, Ordering::SeqCst)));
    assert_eq!(maybe.block(WAIT)?, Some(10));
    assert_eq!(maybe.block(WAIT)?, Some(11));
    Ok(())
}
