mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{WAIT, init_tracing};
use sluice::{
    BackoffPolicy, ErrorKind, Flow, FlowError, Scheduler, StepVerifier, VerifyError,
    combine_latest, combine_latest2, concat, concat_delay_error, merge, merge_delay_error,
    merge_sequential, zip, zip2, zip3,
};

/// Fails on the first `failures` subscriptions, then emits `items`.
fn flaky(failures: usize, items: Vec<i32>) -> (Flow<i32>, Arc<AtomicUsize>) {
    let subscriptions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&subscriptions);
    let flow = Flow::defer(move || {
        if counter.fetch_add(1, Ordering::SeqCst) < failures {
            Flow::error(FlowError::upstream("transient"))
        } else {
            Flow::just(items.clone())
        }
    });
    (flow, subscriptions)
}

#[test]
fn map_and_filter_transform_in_order() -> anyhow::Result<()> {
    init_tracing();
    StepVerifier::create(Flow::range(1, 6).map(|x| x * 2).filter(|x| x % 3 != 0))
        .expect_next([2, 4, 8, 10])
        .verify_complete()?;
    Ok(())
}

#[test]
fn map_panic_becomes_panicked_error() -> anyhow::Result<()> {
    StepVerifier::create(Flow::range(1, 3).map(|x| if x == 2 { panic!("two") } else { x }))
        .expect_next([1])
        .expect_error_matches(|e| *e == FlowError::Panicked { message: "two".into() })
        .verify()?;
    Ok(())
}

#[test]
fn try_map_err_terminates_and_cancels() -> anyhow::Result<()> {
    let cancelled = Arc::new(AtomicUsize::new(0));
    let hook = Arc::clone(&cancelled);
    let flow = Flow::range(1, 100)
        .do_on_cancel(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
        .try_map(|x| {
            if x < 3 {
                Ok(x)
            } else {
                Err(FlowError::upstream(format!("rejected {x}")))
            }
        });
    StepVerifier::create(flow)
        .expect_next([1, 2])
        .expect_error_kind(ErrorKind::Upstream)
        .verify()?;
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn filter_replenishes_dropped_items() -> anyhow::Result<()> {
    StepVerifier::with_initial_request(Flow::range(1, 10).filter(|x| x % 5 == 0), 1)
        .expect_next([5])
        .then_request(1)
        .expect_next([10])
        .verify_complete()?;
    Ok(())
}

#[test]
fn take_next_and_collect_list() -> anyhow::Result<()> {
    StepVerifier::create(Flow::range(1, 1000).take(3))
        .expect_next([1, 2, 3])
        .verify_complete()?;
    StepVerifier::create(Flow::just(["a", "b"]).next())
        .expect_next(["a"])
        .verify_complete()?;
    StepVerifier::create(Flow::range(1, 4).collect_list())
        .expect_next([vec![1, 2, 3, 4]])
        .verify_complete()?;
    StepVerifier::create(Flow::<i32>::empty().next()).verify_complete()?;
    Ok(())
}

#[test]
fn range_overflow_is_rejected() -> anyhow::Result<()> {
    StepVerifier::create(Flow::range(i32::MAX, 2))
        .expect_error_kind(ErrorKind::IllegalArgument)
        .verify()?;
    StepVerifier::create(Flow::range(i32::MAX, 1))
        .expect_next([i32::MAX])
        .verify_complete()?;
    Ok(())
}

#[test]
fn flat_map_merges_inner_sequences() -> anyhow::Result<()> {
    let flow = Flow::range(1, 3).flat_map(|x| Flow::just([x * 10, x * 10 + 1]));
    StepVerifier::create(flow.collect_list())
        .expect_next_matches(|all: &Vec<i32>| {
            let mut sorted = all.clone();
            sorted.sort();
            sorted == vec![10, 11, 20, 21, 30, 31]
        })
        .verify_complete()?;
    Ok(())
}

/// Looks up two records for `name`; the lookup for "A" is slow.
fn find_by_name(name: String) -> Flow<String> {
    let records = Flow::just([format!("name{name}1"), format!("name{name}2")]);
    if name == "A" {
        records.delay_subscription(Duration::from_millis(100))
    } else {
        records
    }
}

#[test]
fn flat_map_emits_in_arrival_order() -> anyhow::Result<()> {
    let flow = Flow::just(["a", "b"])
        .map(|s| s.to_uppercase())
        .flat_map(find_by_name);
    StepVerifier::create(flow)
        .expect_next(["nameB1", "nameB2", "nameA1", "nameA2"].map(String::from))
        .expect_complete()
        .verify_timeout(WAIT)?;
    Ok(())
}

#[test]
fn flat_map_sequential_emits_in_declaration_order() -> anyhow::Result<()> {
    let flow = Flow::just(["a", "b"])
        .map(|s| s.to_uppercase())
        .flat_map_sequential(find_by_name);
    StepVerifier::create(flow)
        .expect_next(["nameA1", "nameA2", "nameB1", "nameB2"].map(String::from))
        .expect_complete()
        .verify_timeout(WAIT)?;
    Ok(())
}

#[test]
fn flat_map_sequential_keeps_outer_order_despite_timing() -> anyhow::Result<()> {
    let flow = Flow::just([30_u64, 10, 20]).flat_map_sequential(|ms| {
        Flow::just([ms]).delay_elements(Duration::from_millis(ms))
    });
    StepVerifier::create(flow)
        .expect_next([30, 10, 20])
        .expect_complete()
        .verify_timeout(WAIT)?;
    Ok(())
}

#[test]
fn flat_map_inner_error_terminates() -> anyhow::Result<()> {
    let flow = Flow::range(1, 5).flat_map_with(
        |x| {
            if x == 2 {
                Flow::error(FlowError::upstream("inner"))
            } else {
                Flow::just([x])
            }
        },
        1,
    );
    StepVerifier::create(flow)
        .expect_next([1])
        .expect_error_kind(ErrorKind::Upstream)
        .verify()?;
    Ok(())
}

#[test]
fn switch_if_empty_subscribes_fallback_only_when_empty() -> anyhow::Result<()> {
    let subscribed = Arc::new(AtomicUsize::new(0));
    let hook = Arc::clone(&subscribed);
    let fallback = Flow::just([9]).do_on_subscribe(move || {
        hook.fetch_add(1, Ordering::SeqCst);
    });

    StepVerifier::create(Flow::just([1, 2]).switch_if_empty(fallback.clone()))
        .expect_next([1, 2])
        .verify_complete()?;
    assert_eq!(subscribed.load(Ordering::SeqCst), 0);

    StepVerifier::create(Flow::empty().switch_if_empty(fallback))
        .expect_next([9])
        .verify_complete()?;
    assert_eq!(subscribed.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn on_error_resume_and_return_compose_left_to_right() -> anyhow::Result<()> {
    let failing = Flow::just([1]).concat_with(Flow::error(FlowError::upstream("x")));

    StepVerifier::create(
        failing
            .on_error_return(-1)
            .on_error_resume(|_| Flow::just([-2])),
    )
    .expect_next([1, -1])
    .verify_complete()?;

    StepVerifier::create(failing.on_error_resume(|e| {
        Flow::just([e.as_message().len() as i32])
    }))
    .expect_next([1, 8])
    .verify_complete()?;
    Ok(())
}

#[test]
fn retry_resubscribes_until_success() -> anyhow::Result<()> {
    let (flow, subscriptions) = flaky(1, vec![7, 8]);
    StepVerifier::create(flow.retry(1))
        .expect_next([7, 8])
        .verify_complete()?;
    assert_eq!(subscriptions.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn retry_exhaustion_carries_the_last_error() -> anyhow::Result<()> {
    let (flow, subscriptions) = flaky(usize::MAX, vec![]);
    StepVerifier::create(flow.retry(2))
        .expect_error_matches(|e| {
            matches!(e, FlowError::RetryExhausted { attempts: 2, last }
                if **last == FlowError::upstream("transient"))
        })
        .verify()?;
    assert_eq!(subscriptions.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn retry_backoff_waits_between_attempts() -> anyhow::Result<()> {
    let (flow, subscriptions) = flaky(2, vec![1]);
    let started = Instant::now();
    StepVerifier::create(flow.retry_backoff(BackoffPolicy::fixed(3, Duration::from_millis(20))))
        .expect_next([1])
        .expect_complete()
        .verify_timeout(WAIT)?;
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(subscriptions.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn timeout_fires_on_silence_and_cancels_upstream() -> anyhow::Result<()> {
    let cancelled = Arc::new(AtomicUsize::new(0));
    let hook = Arc::clone(&cancelled);
    let flow = Flow::<i32>::never()
        .do_on_cancel(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
        .timeout(Duration::from_millis(30));
    StepVerifier::create(flow)
        .expect_error_matches(|e| e.is_timeout())
        .verify_timeout(WAIT)?;
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn timeout_does_not_fire_for_fast_sources() -> anyhow::Result<()> {
    StepVerifier::create(Flow::range(1, 3).timeout(Duration::from_secs(2)))
        .expect_next([1, 2, 3])
        .expect_complete()
        .verify_timeout(WAIT)?;
    Ok(())
}

#[test]
fn delay_elements_and_delay_subscription() -> anyhow::Result<()> {
    let started = Instant::now();
    StepVerifier::create(Flow::range(1, 3).delay_elements(Duration::from_millis(15)))
        .expect_next([1, 2, 3])
        .expect_complete()
        .verify_timeout(WAIT)?;
    assert!(started.elapsed() >= Duration::from_millis(45));

    let started = Instant::now();
    StepVerifier::create(Flow::just([1]).delay_subscription(Duration::from_millis(30)))
        .expect_subscription()
        .expect_no_event(Duration::from_millis(10))
        .expect_next([1])
        .expect_complete()
        .verify_timeout(WAIT)?;
    assert!(started.elapsed() >= Duration::from_millis(30));
    Ok(())
}

#[test]
fn concat_and_concat_delay_error() -> anyhow::Result<()> {
    StepVerifier::create(concat(vec![Flow::range(1, 2), Flow::empty(), Flow::range(3, 2)]))
        .expect_next([1, 2, 3, 4])
        .verify_complete()?;

    let failing = || Flow::<i32>::error(FlowError::upstream("first"));
    StepVerifier::create(concat(vec![Flow::just([1]), failing(), Flow::just([2])]))
        .expect_next([1])
        .expect_error()
        .verify()?;

    StepVerifier::create(concat_delay_error(vec![
        Flow::just([1]),
        failing(),
        Flow::just([2]),
        Flow::error(FlowError::upstream("second")),
    ]))
    .expect_next([1, 2])
    .expect_error_matches(|e| *e == FlowError::upstream("first"))
    .verify()?;
    Ok(())
}

#[test]
fn merge_family() -> anyhow::Result<()> {
    let slow = Flow::just([1, 2]).delay_elements(Duration::from_millis(40));
    let fast = Flow::just([10, 20]);

    StepVerifier::create(merge(vec![slow.clone(), fast.clone()]))
        .expect_next([10, 20, 1, 2])
        .expect_complete()
        .verify_timeout(WAIT)?;

    StepVerifier::create(merge_sequential(vec![slow.clone(), fast.clone()]))
        .expect_next([1, 2, 10, 20])
        .expect_complete()
        .verify_timeout(WAIT)?;

    StepVerifier::create(fast.merge_with(Flow::just([30])))
        .expect_next([10, 20, 30])
        .verify_complete()?;

    StepVerifier::create(merge_delay_error(
        1,
        vec![
            Flow::just([1]),
            Flow::error(FlowError::upstream("held")),
            Flow::just([2]),
        ],
    ))
    .expect_next([1, 2])
    .expect_error_matches(|e| *e == FlowError::upstream("held"))
    .verify_timeout(WAIT)?;
    Ok(())
}

#[test]
fn zip_stops_at_the_shortest_source() -> anyhow::Result<()> {
    let cancelled = Arc::new(AtomicUsize::new(0));
    let hook = Arc::clone(&cancelled);
    let long = Flow::range(1, 1000).do_on_cancel(move || {
        hook.fetch_add(1, Ordering::SeqCst);
    });

    StepVerifier::create(zip(vec![Flow::range(1, 3), long], |row| row.iter().sum::<i32>()))
        .expect_next([2, 4, 6])
        .verify_complete()?;
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);

    StepVerifier::create(zip2(Flow::just(["a", "b"]), Flow::range(1, 5), |s, n| format!("{s}{n}")))
        .expect_next(["a1".to_string(), "b2".to_string()])
        .verify_complete()?;

    StepVerifier::create(Flow::range(1, 2).zip_with(Flow::just(['x', 'y']), |n, c| (n, c)))
        .expect_next([(1, 'x'), (2, 'y')])
        .verify_complete()?;

    StepVerifier::create(zip3(
        Flow::just([1]),
        Flow::just(["one"]),
        Flow::just([1.5_f64]),
        |a, b, c| format!("{a}/{b}/{c}"),
    ))
    .expect_next(["1/one/1.5".to_string()])
    .verify_complete()?;
    Ok(())
}

#[test]
fn combine_latest_emits_once_every_source_has_a_value() -> anyhow::Result<()> {
    StepVerifier::create(combine_latest(
        vec![Flow::just([1, 2]), Flow::just([10, 20])],
        |row| row.iter().sum::<i32>(),
    ))
    .expect_next([12, 22])
    .verify_complete()?;

    StepVerifier::create(combine_latest2(Flow::<i32>::empty(), Flow::never(), |a: i32, b: i32| a + b))
        .expect_complete()
        .verify_timeout(WAIT)?;
    Ok(())
}

#[test]
fn side_effect_hooks_observe_signals() -> anyhow::Result<()> {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let (a, b, c, d) = (
        Arc::clone(&log),
        Arc::clone(&log),
        Arc::clone(&log),
        Arc::clone(&log),
    );
    let flow = Flow::range(1, 2)
        .do_on_subscribe(move || a.lock().unwrap().push("subscribe".into()))
        .do_on_request(move |n| b.lock().unwrap().push(format!("request {n}")))
        .do_on_next(move |v| c.lock().unwrap().push(format!("next {v}")))
        .do_on_complete(move || d.lock().unwrap().push("complete".into()))
        .log_as("hooks");
    StepVerifier::with_initial_request(flow, 5).expect_next([1, 2]).verify_complete()?;
    assert_eq!(
        *log.lock().unwrap(),
        vec!["subscribe", "request 5", "next 1", "next 2", "complete"]
    );
    Ok(())
}

#[test]
fn hook_panic_becomes_an_error() -> anyhow::Result<()> {
    StepVerifier::create(Flow::range(1, 3).do_on_next(|v| assert_ne!(*v, 2)))
        .expect_next([1])
        .expect_error_kind(ErrorKind::Panicked)
        .verify()?;
    Ok(())
}

#[test]
fn mismatched_expectation_is_reported() {
    let err = StepVerifier::create(Flow::just([1]))
        .expect_next([2])
        .verify()
        .unwrap_err();
    assert!(matches!(err, VerifyError::Mismatch { .. }));
    assert_eq!(err.as_label(), "verify_mismatch");
}

#[test]
fn publish_on_preserves_order_across_threads() -> anyhow::Result<()> {
    StepVerifier::create(Flow::range(1, 200).publish_on(&Scheduler::parallel()))
        .expect_next_count(200)
        .expect_complete()
        .verify_timeout(WAIT)?;
    StepVerifier::create(
        Flow::range(1, 100)
            .publish_on(&Scheduler::parallel())
            .collect_list(),
    )
    .expect_next([(1..=100).collect::<Vec<i32>>()])
    .expect_complete()
    .verify_timeout(WAIT)?;
    Ok(())
}
