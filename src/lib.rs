//! # sluice
//!
//! **sluice** is a reactive-streams style library for Rust: asynchronous
//! sequences of values with backpressure, composable operators and named
//! schedulers.
//!
//! A sequence ([`Flow`] for 0..N items, [`Maybe`] for 0..1) is a lazy
//! description. Subscribing builds one chain of operator stages; demand flows
//! upstream through `request(n)`, items flow downstream no faster than
//! requested.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  ┌───────────────┐   ┌───────────────┐   ┌───────────────┐
//!  │  Flow::range  │   │ Maybe::from_  │   │ Flow::defer / │
//!  │  Flow::just   │   │   callable    │   │ from_publisher│
//!  └───────┬───────┘   └───────┬───────┘   └───────┬───────┘
//!          ▼                   ▼                   ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │  Operator stages (one per operator, per subscription)         │
//! │  - map / filter / take / flat_map / switch_if_empty / log     │
//! │  - on_error_resume / retry / timeout / delay_*                │
//! │  - combinators: concat, merge, zip, combine_latest            │
//! └───────┬──────────────────────────────┬────────────────────────┘
//!         │ subscribe_on / publish_on    │ on_next ≤ request(n)
//!         ▼                              ▼
//! ┌─────────────────────┐      ┌──────────────────────────────────┐
//! │ Scheduler (tokio rt)│      │ Subscriber                       │
//! │ single | parallel | │      │ - subscribe_next / subscribe_all │
//! │ boundedElastic      │      │ - Maybe::block                   │
//! │   └─ Worker (FIFO)  │      │ - StepVerifier (tests)           │
//! └─────────────────────┘      └──────────────────────────────────┘
//! ```
//!
//! ### Signal lifecycle
//! ```text
//! subscribe(s) ──► s.on_subscribe(subscription)
//!
//! loop {
//!   ├─► s calls subscription.request(n)         (n = 0 ─► IllegalArgument)
//!   ├─► up to n × s.on_next(item)
//!   └─► exactly one of:
//!         - s.on_complete()
//!         - s.on_error(FlowError)
//!         - s calls subscription.cancel()       (nothing is delivered after)
//! }
//! ```
//!
//! ## Features
//! | Area             | Description                                                     | Key types                              |
//! |------------------|-----------------------------------------------------------------|----------------------------------------|
//! | **Sequences**    | Lazy 0..N and 0..1 sequences with operators.                    | [`Flow`], [`Maybe`]                    |
//! | **Protocol**     | Publisher / subscriber / subscription contract.                 | [`Publisher`], [`Subscriber`]          |
//! | **Combinators**  | Sequential, concurrent and indexed composition.                 | [`concat`], [`merge`], [`zip`]         |
//! | **Schedulers**   | Named execution contexts and blocking-call detection.           | [`Scheduler`], [`BlockingDetector`]    |
//! | **Policies**     | Retry backoff with jitter.                                      | [`BackoffPolicy`], [`JitterPolicy`]    |
//! | **Verification** | Scripted expectations for tests.                                | [`StepVerifier`]                       |
//! | **Errors**       | Typed errors with stable labels.                                | [`FlowError`], [`VerifyError`]         |
//! | **Configuration**| Pool sizes, prefetch, default verification deadline.            | [`Config`]                             |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use sluice::{Flow, Scheduler, StepVerifier};
//!
//! let squares = Flow::range(1, 4)
//!     .map(|x| x * x)
//!     .filter(|x| x % 2 == 0)
//!     .publish_on(&Scheduler::parallel());
//!
//! StepVerifier::create(squares)
//!     .expect_next([4, 16])
//!     .expect_complete()
//!     .verify_timeout(Duration::from_secs(5))
//!     .unwrap();
//! ```
mod config;
mod error;
mod flow;
mod operators;
mod policies;
mod protocol;

pub mod combinators;
pub mod schedulers;
pub mod verify;

// ---- Public re-exports ----

pub use combinators::{
    combine_latest, combine_latest2, concat, concat_delay_error, merge, merge_delay_error,
    merge_sequential, zip, zip2, zip3,
};
pub use config::Config;
pub use error::{BlockingOperationError, ErrorKind, FlowError, SchedulerError, VerifyError};
pub use flow::{Flow, Maybe};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use protocol::{
    Demand, Disposable, EmptySubscription, Publisher, PublisherRef, Signal, SignalKind,
    Subscriber, SubscriberRef, Subscription, SubscriptionArbiter, SubscriptionRef, UNBOUNDED,
    validate_request,
};
pub use schedulers::{BlockingDetector, Scheduler, SchedulerBuilder, SchedulerKind, Worker};
pub use verify::StepVerifier;
