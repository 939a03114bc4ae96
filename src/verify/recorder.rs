//! Subscriber that records signals for the verifier to consume.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use crate::error::FlowError;
use crate::protocol::{Signal, Subscriber, SubscriptionRef, lock};

struct Recorded<T> {
    events: VecDeque<Signal<T>>,
    subscription: Option<SubscriptionRef>,
    terminated: bool,
    cancelled: bool,
    violation: Option<String>,
}

/// Queue of observed signals, filled by any thread, drained by the
/// verifying thread.
pub(crate) struct Recorder<T> {
    initial_request: u64,
    state: Mutex<Recorded<T>>,
    arrived: Condvar,
}

impl<T: Send + 'static> Recorder<T> {
    pub(crate) fn new(initial_request: u64) -> Arc<Self> {
        Arc::new(Self {
            initial_request,
            state: Mutex::new(Recorded {
                events: VecDeque::new(),
                subscription: None,
                terminated: false,
                cancelled: false,
                violation: None,
            }),
            arrived: Condvar::new(),
        })
    }

    fn push(&self, signal: Signal<T>) {
        let mut st = lock(&self.state);
        if st.cancelled {
            return;
        }
        if st.terminated {
            let label = signal.kind().as_label();
            tracing::warn!(signal = label, "signal after terminal signal");
            st.violation
                .get_or_insert_with(|| format!("{label} received after the terminal signal"));
        } else {
            st.terminated = signal.is_terminal();
            st.events.push_back(signal);
        }
        drop(st);
        self.arrived.notify_all();
    }

    /// Pops the next signal, waiting until `deadline` (or forever).
    /// `None` means the deadline passed.
    pub(crate) fn next(&self, deadline: Option<Instant>) -> Option<Signal<T>> {
        let mut st = lock(&self.state);
        loop {
            if let Some(signal) = st.events.pop_front() {
                return Some(signal);
            }
            st = match deadline {
                None => self
                    .arrived
                    .wait(st)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.arrived
                        .wait_timeout(st, deadline - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Puts back a signal a step looked at but did not consume.
    pub(crate) fn unread(&self, signal: Signal<T>) {
        lock(&self.state).events.push_front(signal);
    }

    pub(crate) fn violation(&self) -> Option<String> {
        lock(&self.state).violation.clone()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        lock(&self.state).terminated
    }

    pub(crate) fn request(&self, n: u64) {
        let subscription = lock(&self.state).subscription.clone();
        if let Some(s) = subscription {
            s.request(n);
        }
    }

    /// Cancels upstream; signals racing with the cancel are dropped.
    pub(crate) fn cancel(&self) {
        let subscription = {
            let mut st = lock(&self.state);
            st.cancelled = true;
            st.subscription.take()
        };
        if let Some(s) = subscription {
            s.cancel();
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for Recorder<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        let accepted = {
            let mut st = lock(&self.state);
            if st.subscription.is_some() {
                st.violation
                    .get_or_insert_with(|| "onSubscribe received twice".to_string());
                false
            } else if st.cancelled {
                false
            } else {
                st.subscription = Some(Arc::clone(&subscription));
                true
            }
        };
        if !accepted {
            subscription.cancel();
            return;
        }
        self.push(Signal::Subscribe);
        if self.initial_request > 0 {
            subscription.request(self.initial_request);
        }
    }

    fn on_next(&self, item: T) {
        self.push(Signal::Next(item));
    }

    fn on_error(&self, error: FlowError) {
        self.push(Signal::Error(error));
    }

    fn on_complete(&self) {
        self.push(Signal::Complete);
    }
}
