//! # Verification harness.
//!
//! [`StepVerifier`] subscribes a [`Recorder`](recorder::Recorder) to the
//! sequence and walks a script of expectations against the recorded
//! signals:
//!
//! ```text
//! sequence ──signals──► Recorder [queue] ──► script: expect_next, then_request, expect_complete, ...
//!                          ▲                                  │
//!                          └──── request(n) / cancel() ◄──────┘
//! ```
//!
//! Failures are reported as [`VerifyError`](crate::VerifyError) values, never
//! as panics, so tests decide how to assert on them.

mod recorder;
mod step_verifier;

pub use step_verifier::StepVerifier;
