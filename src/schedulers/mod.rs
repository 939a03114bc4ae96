//! # Schedulers: where stages run.
//!
//! A [`Scheduler`] is a named execution context (`single`, `parallel`,
//! `boundedElastic`) owning a tokio runtime. Stages never touch threads
//! directly; they acquire a [`Worker`] (a FIFO lane) and submit jobs to it.
//!
//! ```text
//! Scheduler ──create_worker()──► Worker ──► [queue] ──► drain task on runtime
//!     │                                                     │
//!     └── active_workers() gauge ◄──── +1 on spawn, -1 on exit
//! ```
//!
//! Inside a job, [`current_context`] names the scheduler, and
//! [`check_blocking`] consults the scheduler's [`BlockingDetector`], if any.

mod blocking;
mod builder;
mod context;
mod kind;
mod scheduler;
mod worker;

pub use blocking::{BlockingDetector, check_blocking};
pub use builder::SchedulerBuilder;
pub use context::current_context;
pub use kind::SchedulerKind;
pub use scheduler::Scheduler;
pub use worker::Worker;

pub(crate) use context::current_kind;
