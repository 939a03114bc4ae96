//! Error types used by sequences, schedulers and the verification harness.
//!
//! This module defines the error enums shared across the crate:
//!
//! - [`FlowError`]: the error carried by an `OnError` signal.
//! - [`BlockingOperationError`]: raised by the blocking-call detector.
//! - [`SchedulerError`]: failures selecting or building a scheduler.
//! - [`VerifyError`]: a failed step of a verification script.
//!
//! `FlowError` is `Clone` because a single failure may be observed by several
//! stages (delay-error combinators hold it, the verifier records it).
//! Every enum provides `as_label` for logs/metrics.

use std::any::Any;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// # Error delivered through `OnError`.
///
/// Errors are terminal by default: the first one reaching a stage
/// short-circuits the rest of the chain unless a recovery or delay-error
/// combinator intercepts it.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// A caller-supplied argument was rejected (including `request(0)`).
    #[error("illegal argument: {message}")]
    IllegalArgument {
        /// What was wrong with the argument.
        message: String,
    },

    /// An operation was attempted in a state that does not allow it.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of the state conflict.
        message: String,
    },

    /// A producer or transformer failed.
    #[error("upstream failure: {message}")]
    Upstream {
        /// The underlying error message.
        message: String,
    },

    /// A user callback panicked; the panic was caught at the stage boundary.
    #[error("callback panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },

    /// An I/O computation wrapped by the caller failed.
    #[error("i/o failure ({kind:?}): {message}")]
    Io {
        /// I/O error classification reported by the caller.
        kind: io::ErrorKind,
        /// The underlying error message.
        message: String,
    },

    /// A scheduled deadline elapsed before the next signal.
    #[error("no signal observed within {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The blocking-call detector rejected an operation.
    #[error(transparent)]
    Blocking(#[from] BlockingOperationError),

    /// A signal was delivered out of order (internal defect, never recovered).
    #[error("protocol violation: {message}")]
    ProtocolViolation {
        /// Which rule was broken.
        message: String,
    },

    /// Resubscription budget spent; carries the last observed error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Number of resubscriptions performed.
        attempts: u32,
        /// The error that ended the last attempt.
        last: Box<FlowError>,
    },
}

/// Classification of [`FlowError`] used by verification steps and filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IllegalArgument,
    IllegalState,
    Upstream,
    Panicked,
    Io,
    Timeout,
    Blocking,
    ProtocolViolation,
    RetryExhausted,
}

impl FlowError {
    /// Shorthand for [`FlowError::IllegalArgument`].
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        FlowError::IllegalArgument {
            message: message.into(),
        }
    }

    /// Shorthand for [`FlowError::IllegalState`].
    pub fn illegal_state(message: impl Into<String>) -> Self {
        FlowError::IllegalState {
            message: message.into(),
        }
    }

    /// Shorthand for [`FlowError::Upstream`].
    pub fn upstream(message: impl Into<String>) -> Self {
        FlowError::Upstream {
            message: message.into(),
        }
    }

    /// Shorthand for [`FlowError::ProtocolViolation`].
    pub fn protocol(message: impl Into<String>) -> Self {
        FlowError::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Converts a caught panic payload into [`FlowError::Panicked`].
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        FlowError::Panicked { message }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::IllegalArgument { .. } => ErrorKind::IllegalArgument,
            FlowError::IllegalState { .. } => ErrorKind::IllegalState,
            FlowError::Upstream { .. } => ErrorKind::Upstream,
            FlowError::Panicked { .. } => ErrorKind::Panicked,
            FlowError::Io { .. } => ErrorKind::Io,
            FlowError::Timeout { .. } => ErrorKind::Timeout,
            FlowError::Blocking(_) => ErrorKind::Blocking,
            FlowError::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            FlowError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use sluice::FlowError;
    ///
    /// let err = FlowError::illegal_argument("request(0)");
    /// assert_eq!(err.as_label(), "flow_illegal_argument");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            FlowError::IllegalArgument { .. } => "flow_illegal_argument",
            FlowError::IllegalState { .. } => "flow_illegal_state",
            FlowError::Upstream { .. } => "flow_upstream",
            FlowError::Panicked { .. } => "flow_panicked",
            FlowError::Io { .. } => "flow_io",
            FlowError::Timeout { .. } => "flow_timeout",
            FlowError::Blocking(_) => "flow_blocking_call",
            FlowError::ProtocolViolation { .. } => "flow_protocol_violation",
            FlowError::RetryExhausted { .. } => "flow_retry_exhausted",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            FlowError::IllegalArgument { message } => format!("illegal argument: {message}"),
            FlowError::IllegalState { message } => format!("illegal state: {message}"),
            FlowError::Upstream { message } => format!("error: {message}"),
            FlowError::Panicked { message } => format!("panic: {message}"),
            FlowError::Io { kind, message } => format!("io {kind:?}: {message}"),
            FlowError::Timeout { timeout } => format!("timeout: {timeout:?}"),
            FlowError::Blocking(err) => err.to_string(),
            FlowError::ProtocolViolation { message } => format!("protocol: {message}"),
            FlowError::RetryExhausted { attempts, last } => {
                format!("retries={attempts}; last={}", last.as_message())
            }
        }
    }

    /// True if this error was produced by a timeout operator or deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FlowError::Timeout { .. })
    }
}

impl From<io::Error> for FlowError {
    fn from(err: io::Error) -> Self {
        FlowError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// # Disallowed blocking call on a non-blocking execution context.
///
/// Produced only by an attached [`BlockingDetector`](crate::schedulers::BlockingDetector);
/// the engine itself never raises it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("blocking call `{operation}` is not allowed on non-blocking scheduler `{context}`")]
pub struct BlockingOperationError {
    /// The operation that was reported as blocking.
    pub operation: String,
    /// Name of the scheduler whose worker was running.
    pub context: String,
}

/// # Errors selecting or constructing a scheduler.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The name does not identify any scheduler kind.
    #[error("unknown scheduler name `{name}` (expected single, boundedElastic or parallel)")]
    UnknownName {
        /// The name that failed to resolve.
        name: String,
    },

    /// The backing runtime could not be started.
    #[error("failed to start scheduler `{name}`: {source}")]
    Build {
        /// Scheduler name.
        name: String,
        /// Runtime construction failure.
        #[source]
        source: io::Error,
    },
}

impl SchedulerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SchedulerError::UnknownName { .. } => "scheduler_unknown_name",
            SchedulerError::Build { .. } => "scheduler_build_failed",
        }
    }
}

/// # Verification failures reported by [`StepVerifier`](crate::verify::StepVerifier).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    /// The observed signal did not match the expectation.
    #[error("step {step}: expected {expected}, observed {observed}")]
    Mismatch {
        /// Zero-based index of the failing step.
        step: usize,
        /// Description of the expectation.
        expected: String,
        /// Description of what arrived instead.
        observed: String,
    },

    /// The deadline elapsed while a step was still waiting.
    #[error("step {step}: timed out after {timeout:?} waiting for {expected}")]
    Timeout {
        /// Zero-based index of the waiting step.
        step: usize,
        /// Description of the awaited signal.
        expected: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// A user predicate or consumer panicked.
    #[error("step {step}: assertion panicked: {message}")]
    Assertion {
        /// Zero-based index of the step whose predicate panicked.
        step: usize,
        /// Panic payload rendered as text.
        message: String,
    },

    /// The sequence broke the signal protocol (e.g. a signal after the terminal one).
    #[error("protocol violation: {message}")]
    ProtocolViolation {
        /// Which rule was broken.
        message: String,
    },
}

impl VerifyError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            VerifyError::Mismatch { .. } => "verify_mismatch",
            VerifyError::Timeout { .. } => "verify_timeout",
            VerifyError::Assertion { .. } => "verify_assertion",
            VerifyError::ProtocolViolation { .. } => "verify_protocol_violation",
        }
    }
}
