//! # Signal & subscription protocol.
//!
//! The wire contract every stage obeys:
//!
//! ```text
//! Publisher <── subscribe(Subscriber) ──────────────── caller / downstream stage
//! Publisher ──► on_subscribe(Subscription) ──────────► Subscriber
//! Subscription <── request(n) / cancel() ───────────── Subscriber
//! Publisher ──► on_next(T) × ≤ requested ────────────► Subscriber
//! Publisher ──► on_error(FlowError) | on_complete() ─► Subscriber   (at most once)
//! ```
//!
//! ## Rules
//! - `on_subscribe` precedes every other signal.
//! - No more `on_next` than requested; `u64::MAX` means unbounded.
//! - At most one terminal signal; nothing after it, nothing after `cancel()`.
//! - `request(0)` is answered with an `IllegalArgument` error.

mod publisher;
mod serial;
mod signal;
mod subscriber;
mod subscription;

pub use publisher::{Publisher, PublisherRef};
pub use signal::{Signal, SignalKind};
pub use subscriber::{Disposable, Subscriber, SubscriberRef};
pub use subscription::{
    Demand, EmptySubscription, Subscription, SubscriptionArbiter, SubscriptionRef, UNBOUNDED,
    validate_request,
};

pub(crate) use serial::{WorkInProgress, guarded, lock};
pub(crate) use subscriber::LambdaSubscriber;
pub(crate) use subscription::UpstreamSlot;
