//! # Subscriptions and demand accounting.
//!
//! - [`Subscription`]: the handle a subscriber uses to request and cancel.
//! - [`Demand`]: lock-free outstanding-request counter with saturation.
//! - [`SubscriptionArbiter`]: a stable subscription handed downstream once,
//!   whose upstream can be swapped (concat, switch_if_empty, on_error_resume,
//!   retry) without losing outstanding demand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::FlowError;

use super::lock;

/// Demand value meaning "no limit".
pub const UNBOUNDED: u64 = u64::MAX;

/// Live handle between one subscriber and its publisher.
pub trait Subscription: Send + Sync {
    /// Adds `n` to the outstanding demand. `n == 0` is a protocol violation.
    fn request(&self, n: u64);

    /// Stops delivery. Idempotent; no signal is delivered afterwards.
    fn cancel(&self);
}

/// Shared subscription handle.
pub type SubscriptionRef = Arc<dyn Subscription>;

/// Rejects `request(0)`.
pub fn validate_request(n: u64) -> Result<(), FlowError> {
    if n == 0 {
        Err(FlowError::illegal_argument(
            "request amount must be positive, got 0",
        ))
    } else {
        Ok(())
    }
}

/// Outstanding demand counter.
///
/// ### Rules
/// - Additions saturate at [`UNBOUNDED`], which is sticky.
/// - `produced` never goes below zero and never touches an unbounded counter.
#[derive(Debug, Default)]
pub struct Demand {
    requested: AtomicU64,
}

impl Demand {
    /// Creates a counter with no outstanding demand.
    pub const fn new() -> Self {
        Self {
            requested: AtomicU64::new(0),
        }
    }

    /// Adds `n`, returning the previous value.
    pub fn add(&self, n: u64) -> u64 {
        let mut current = self.requested.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = current.saturating_add(n);
            match self.requested.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(prev) => return prev,
                Err(actual) => current = actual,
            }
        }
    }

    /// Subtracts `n` emitted items, returning the remaining demand.
    pub fn produced(&self, n: u64) -> u64 {
        let mut current = self.requested.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = current.saturating_sub(n);
            match self.requested.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current outstanding demand.
    #[inline]
    pub fn get(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    /// True once the counter reached [`UNBOUNDED`].
    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.get() == UNBOUNDED
    }
}

/// Subscription that ignores everything; used by sources that terminate
/// right after `on_subscribe`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySubscription;

impl EmptySubscription {
    /// Returns a shared handle.
    pub fn shared() -> SubscriptionRef {
        Arc::new(EmptySubscription)
    }
}

impl Subscription for EmptySubscription {
    fn request(&self, _n: u64) {}
    fn cancel(&self) {}
}

enum Slot {
    Empty,
    Set(SubscriptionRef),
    Cancelled,
}

/// Holder for a stage's single upstream subscription.
///
/// A cancel that arrives before the subscription is cancelled on arrival;
/// requests before arrival are dropped, so stages forward demand only after
/// `on_subscribe`.
pub(crate) struct UpstreamSlot {
    slot: Mutex<Slot>,
}

impl Default for UpstreamSlot {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
        }
    }
}

impl UpstreamSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stores `s`; returns false (and cancels `s`) if a subscription was
    /// already stored or the slot was cancelled.
    pub(crate) fn set(&self, s: SubscriptionRef) -> bool {
        let mut slot = lock(&self.slot);
        match &*slot {
            Slot::Empty => {
                *slot = Slot::Set(s);
                true
            }
            Slot::Set(_) => {
                drop(slot);
                tracing::warn!("duplicate on_subscribe; cancelling the extra subscription");
                s.cancel();
                false
            }
            Slot::Cancelled => {
                drop(slot);
                s.cancel();
                false
            }
        }
    }

    pub(crate) fn get(&self) -> Option<SubscriptionRef> {
        match &*lock(&self.slot) {
            Slot::Set(s) => Some(Arc::clone(s)),
            _ => None,
        }
    }

    pub(crate) fn request(&self, n: u64) {
        if let Some(s) = self.get() {
            s.request(n);
        }
    }

    /// Cancels the stored subscription once; later calls are no-ops.
    pub(crate) fn cancel(&self) {
        let prev = std::mem::replace(&mut *lock(&self.slot), Slot::Cancelled);
        if let Slot::Set(s) = prev {
            s.cancel();
        }
    }

    /// Drops the stored subscription without cancelling it (after a terminal
    /// signal from upstream).
    pub(crate) fn clear(&self) {
        *lock(&self.slot) = Slot::Cancelled;
    }
}

#[derive(Default)]
struct ArbiterState {
    current: Option<SubscriptionRef>,
    requested: u64,
    cancelled: bool,
}

/// Multi-upstream subscription.
///
/// ### Rules
/// - Downstream sees one subscription for the whole run.
/// - Requests made before any upstream exists are remembered.
/// - `set` re-requests the still-outstanding demand from the new upstream;
///   callers report emitted items through [`produced`](Self::produced).
/// - After `cancel`, any newly set upstream is cancelled on arrival.
#[derive(Default)]
pub struct SubscriptionArbiter {
    state: Mutex<ArbiterState>,
}

impl SubscriptionArbiter {
    /// Creates an arbiter with no upstream and no demand.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `upstream` as the active subscription.
    pub fn set(&self, upstream: SubscriptionRef) {
        let outstanding = {
            let mut st = lock(&self.state);
            if st.cancelled {
                None
            } else {
                st.current = Some(Arc::clone(&upstream));
                Some(st.requested)
            }
        };
        match outstanding {
            None => upstream.cancel(),
            Some(0) => {}
            Some(n) => upstream.request(n),
        }
    }

    /// Records `n` items delivered downstream.
    pub fn produced(&self, n: u64) {
        let mut st = lock(&self.state);
        if st.requested != UNBOUNDED {
            st.requested = st.requested.saturating_sub(n);
        }
    }

    /// True once downstream cancelled.
    pub fn is_cancelled(&self) -> bool {
        lock(&self.state).cancelled
    }
}

impl Subscription for SubscriptionArbiter {
    fn request(&self, n: u64) {
        let current = {
            let mut st = lock(&self.state);
            if st.cancelled {
                return;
            }
            st.requested = st.requested.saturating_add(n);
            st.current.clone()
        };
        if let Some(upstream) = current {
            upstream.request(n);
        }
    }

    fn cancel(&self) {
        let current = {
            let mut st = lock(&self.state);
            if st.cancelled {
                return;
            }
            st.cancelled = true;
            st.current.take()
        };
        if let Some(upstream) = current {
            upstream.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct Probe {
        requested: AtomicU64,
        cancelled: AtomicBool,
    }

    impl Subscription for Probe {
        fn request(&self, n: u64) {
            self.requested.fetch_add(n.min(1 << 40), Ordering::SeqCst);
        }
        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn demand_saturates_and_stays_unbounded() {
        let d = Demand::new();
        assert_eq!(d.add(5), 0);
        assert_eq!(d.produced(2), 3);
        assert_eq!(d.add(UNBOUNDED - 1), 3);
        assert!(d.is_unbounded());
        assert_eq!(d.produced(10), UNBOUNDED);
        assert_eq!(d.add(1), UNBOUNDED);
    }

    #[test]
    fn produced_never_underflows() {
        let d = Demand::new();
        d.add(1);
        assert_eq!(d.produced(4), 0);
    }

    #[test]
    fn upstream_slot_cancels_late_arrivals() {
        let slot = UpstreamSlot::new();
        slot.cancel();
        let late = Arc::new(Probe::default());
        assert!(!slot.set(late.clone()));
        assert!(late.cancelled.load(Ordering::SeqCst));

        let slot = UpstreamSlot::new();
        let first = Arc::new(Probe::default());
        let dup = Arc::new(Probe::default());
        assert!(slot.set(first.clone()));
        assert!(!slot.set(dup.clone()));
        assert!(dup.cancelled.load(Ordering::SeqCst));
        slot.request(3);
        assert_eq!(first.requested.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn request_zero_is_rejected() {
        assert!(validate_request(0).is_err());
        assert!(validate_request(1).is_ok());
    }

    #[test]
    fn arbiter_replays_outstanding_demand_on_switch() {
        let arbiter = SubscriptionArbiter::new();
        arbiter.request(5);

        let first = Arc::new(Probe::default());
        arbiter.set(first.clone());
        assert_eq!(first.requested.load(Ordering::SeqCst), 5);

        arbiter.produced(3);
        let second = Arc::new(Probe::default());
        arbiter.set(second.clone());
        assert_eq!(second.requested.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arbiter_cancels_late_upstreams() {
        let arbiter = SubscriptionArbiter::new();
        let first = Arc::new(Probe::default());
        arbiter.set(first.clone());
        arbiter.cancel();
        assert!(first.cancelled.load(Ordering::SeqCst));

        let late = Arc::new(Probe::default());
        arbiter.set(late.clone());
        assert!(late.cancelled.load(Ordering::SeqCst));
        assert_eq!(late.requested.load(Ordering::SeqCst), 0);
    }
}
