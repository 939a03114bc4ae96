use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{ErrorKind, FlowError, VerifyError};
use crate::flow::Flow;
use crate::protocol::{PublisherRef, Signal, UNBOUNDED, guarded};

use super::recorder::Recorder;

type ItemCheck<T> = Box<dyn Fn(&T) -> bool>;
type ErrorCheck = Box<dyn Fn(&FlowError) -> bool>;

enum Step<T> {
    Subscription,
    Next { expected: String, check: ItemCheck<T> },
    NextCount(u64),
    ConsumeWhile(ItemCheck<T>),
    Error { expected: String, check: ErrorCheck },
    Complete,
    NoEvent(Duration),
    Request(u64),
    Cancel,
}

/// Scripted expectations against one subscription of a sequence.
///
/// Steps run in declaration order on the calling thread; signals produced on
/// other threads are queued until a step consumes them.
///
/// # Example
/// ```
/// use sluice::{Flow, StepVerifier};
///
/// StepVerifier::with_initial_request(Flow::range(1, 5), 2)
///     .expect_next([1, 2])
///     .expect_no_event(std::time::Duration::from_millis(20))
///     .then_request(3)
///     .expect_next_count(3)
///     .verify_complete()
///     .unwrap();
/// ```
pub struct StepVerifier<T> {
    source: PublisherRef<T>,
    initial_request: u64,
    steps: Vec<Step<T>>,
}

impl<T: Debug + Send + 'static> StepVerifier<T> {
    /// Verifier that requests everything up front.
    pub fn create(sequence: impl Into<Flow<T>>) -> Self {
        Self::with_initial_request(sequence, UNBOUNDED)
    }

    /// Verifier that requests `n` items on subscribe; `0` requests nothing
    /// until a [`then_request`](Self::then_request) step.
    pub fn with_initial_request(sequence: impl Into<Flow<T>>, n: u64) -> Self {
        Self {
            source: sequence.into().as_publisher(),
            initial_request: n,
            steps: Vec::new(),
        }
    }

    fn step(mut self, step: Step<T>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn expect_subscription(self) -> Self {
        self.step(Step::Subscription)
    }

    /// Expects these items, in order, one `onNext` each.
    pub fn expect_next(mut self, values: impl IntoIterator<Item = T>) -> Self
    where
        T: PartialEq,
    {
        for value in values {
            let expected = format!("onNext({value:?})");
            self = self.step(Step::Next {
                expected,
                check: Box::new(move |item| *item == value),
            });
        }
        self
    }

    pub fn expect_next_count(self, n: u64) -> Self {
        self.step(Step::NextCount(n))
    }

    pub fn expect_next_matches(self, predicate: impl Fn(&T) -> bool + 'static) -> Self {
        self.step(Step::Next {
            expected: "onNext matching predicate".to_string(),
            check: Box::new(predicate),
        })
    }

    /// Consumes items while `predicate` holds; the first other signal is
    /// left for the next step.
    pub fn then_consume_while(self, predicate: impl Fn(&T) -> bool + 'static) -> Self {
        self.step(Step::ConsumeWhile(Box::new(predicate)))
    }

    /// Expects any error.
    pub fn expect_error(self) -> Self {
        self.step(Step::Error {
            expected: "onError".to_string(),
            check: Box::new(|_| true),
        })
    }

    pub fn expect_error_kind(self, kind: ErrorKind) -> Self {
        self.step(Step::Error {
            expected: format!("onError({kind:?})"),
            check: Box::new(move |err| err.kind() == kind),
        })
    }

    pub fn expect_error_matches(self, predicate: impl Fn(&FlowError) -> bool + 'static) -> Self {
        self.step(Step::Error {
            expected: "onError matching predicate".to_string(),
            check: Box::new(predicate),
        })
    }

    pub fn expect_complete(self) -> Self {
        self.step(Step::Complete)
    }

    /// Expects silence for `duration`.
    pub fn expect_no_event(self, duration: Duration) -> Self {
        self.step(Step::NoEvent(duration))
    }

    pub fn then_request(self, n: u64) -> Self {
        self.step(Step::Request(n))
    }

    pub fn then_cancel(self) -> Self {
        self.step(Step::Cancel)
    }

    /// Runs the script with [`Config::verify_timeout`] as deadline (none by
    /// default). Returns how long verification took.
    pub fn verify(self) -> Result<Duration, VerifyError> {
        let limit = Config::global().default_verify_timeout();
        self.run(limit)
    }

    pub fn verify_timeout(self, timeout: Duration) -> Result<Duration, VerifyError> {
        self.run(Some(timeout))
    }

    /// Appends [`expect_complete`](Self::expect_complete) and verifies.
    pub fn verify_complete(self) -> Result<Duration, VerifyError> {
        self.expect_complete().verify()
    }

    /// Appends [`expect_error`](Self::expect_error) and verifies.
    pub fn verify_error(self) -> Result<Duration, VerifyError> {
        self.expect_error().verify()
    }

    fn run(self, limit: Option<Duration>) -> Result<Duration, VerifyError> {
        let started = Instant::now();
        let script = Script {
            recorder: Recorder::new(self.initial_request),
            deadline: limit.map(|d| started + d),
            limit: limit.unwrap_or(Duration::ZERO),
        };
        self.source.subscribe(script.recorder.clone());

        let outcome = script.play(self.steps);
        if !script.recorder.is_terminated() {
            script.recorder.cancel();
        }
        match &outcome {
            Ok(()) => tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "verification passed"),
            Err(err) => tracing::debug!(label = err.as_label(), error = %err, "verification failed"),
        }
        outcome.map(|()| started.elapsed())
    }
}

struct Script<T> {
    recorder: Arc<Recorder<T>>,
    deadline: Option<Instant>,
    limit: Duration,
}

impl<T: Debug + Send + 'static> Script<T> {
    fn play(&self, mut steps: Vec<Step<T>>) -> Result<(), VerifyError> {
        if !matches!(steps.first(), Some(Step::Subscription)) {
            steps.insert(0, Step::Subscription);
        }
        for (index, step) in steps.iter().enumerate() {
            self.play_step(index, step)?;
            self.check_protocol()?;
        }
        Ok(())
    }

    fn play_step(&self, index: usize, step: &Step<T>) -> Result<(), VerifyError> {
        match step {
            Step::Subscription => match self.next(index, "onSubscribe")? {
                Signal::Subscribe => Ok(()),
                other => Err(mismatch(index, "onSubscribe", &other)),
            },
            Step::Next { expected, check } => match self.next(index, expected)? {
                Signal::Next(item) if assert(index, || check(&item))? => Ok(()),
                other => Err(mismatch(index, expected, &other)),
            },
            Step::NextCount(n) => {
                for seen in 0..*n {
                    let expected = format!("{n} onNext signals ({seen} seen)");
                    match self.next(index, &expected)? {
                        Signal::Next(_) => {}
                        other => return Err(mismatch(index, &expected, &other)),
                    }
                }
                Ok(())
            }
            Step::ConsumeWhile(check) => loop {
                let signal = self.next(index, "onNext or end of consumed run")?;
                match signal {
                    Signal::Next(item) => {
                        if !assert(index, || check(&item))? {
                            self.recorder.unread(Signal::Next(item));
                            return Ok(());
                        }
                    }
                    other => {
                        self.recorder.unread(other);
                        return Ok(());
                    }
                }
            },
            Step::Error { expected, check } => match self.next(index, expected)? {
                Signal::Error(err) if assert(index, || check(&err))? => Ok(()),
                other => Err(mismatch(index, expected, &other)),
            },
            Step::Complete => match self.next(index, "onComplete")? {
                Signal::Complete => Ok(()),
                other => Err(mismatch(index, "onComplete", &other)),
            },
            Step::NoEvent(duration) => match self.recorder.next(Some(Instant::now() + *duration)) {
                None => Ok(()),
                Some(other) => Err(mismatch(
                    index,
                    &format!("no event for {duration:?}"),
                    &other,
                )),
            },
            Step::Request(n) => {
                self.recorder.request(*n);
                Ok(())
            }
            Step::Cancel => {
                self.recorder.cancel();
                Ok(())
            }
        }
    }

    fn next(&self, index: usize, expected: &str) -> Result<Signal<T>, VerifyError> {
        self.recorder
            .next(self.deadline)
            .ok_or_else(|| VerifyError::Timeout {
                step: index,
                expected: expected.to_string(),
                timeout: self.limit,
            })
    }

    fn check_protocol(&self) -> Result<(), VerifyError> {
        match self.recorder.violation() {
            Some(message) => Err(VerifyError::ProtocolViolation { message }),
            None => Ok(()),
        }
    }
}

fn assert(step: usize, check: impl FnOnce() -> bool) -> Result<bool, VerifyError> {
    guarded(check).map_err(|err| VerifyError::Assertion {
        step,
        message: match err {
            FlowError::Panicked { message } => message,
            other => other.to_string(),
        },
    })
}

fn mismatch<T: Debug>(step: usize, expected: &str, observed: &Signal<T>) -> VerifyError {
    let label = observed.kind().as_label();
    let observed = match observed {
        Signal::Next(item) => format!("{label}({item:?})"),
        Signal::Error(err) => format!("{label}({err})"),
        _ => label.to_string(),
    };
    VerifyError::Mismatch {
        step,
        expected: expected.to_string(),
        observed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;

    #[test]
    fn mismatch_names_expected_and_observed() {
        let err = StepVerifier::create(Flow::just([1, 2]))
            .expect_next([1, 3])
            .verify()
            .unwrap_err();
        assert_eq!(
            err,
            VerifyError::Mismatch {
                step: 2,
                expected: "onNext(3)".into(),
                observed: "onNext(2)".into(),
            }
        );
    }

    #[test]
    fn consume_while_leaves_first_non_matching_item() {
        StepVerifier::create(Flow::range(1, 6))
            .then_consume_while(|v| *v < 4)
            .expect_next([4, 5, 6])
            .verify_complete()
            .unwrap();
    }

    #[test]
    fn predicate_panic_is_an_assertion_failure() {
        let err = StepVerifier::create(Flow::just([1]))
            .expect_next_matches(|_| panic!("bad predicate"))
            .verify()
            .unwrap_err();
        assert!(matches!(err, VerifyError::Assertion { step: 1, .. }));
    }

    #[test]
    fn never_times_out() {
        let err = StepVerifier::create(Flow::<i32>::never())
            .expect_complete()
            .verify_timeout(Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, VerifyError::Timeout { step: 1, .. }));
    }

    #[test]
    fn cancel_ends_the_script() {
        StepVerifier::create(Flow::<i32>::never())
            .expect_subscription()
            .then_cancel()
            .verify()
            .unwrap();
    }
}
