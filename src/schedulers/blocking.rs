//! # Blocking-call detector.
//!
//! An optional instrumentation hook attached to a scheduler at construction
//! time. Code that is about to block calls [`BlockingDetector::check`] (or the
//! free function [`check_blocking`]); the call fails with
//! [`BlockingOperationError`] when it runs inside a job of a non-blocking
//! scheduler (`single`, `parallel`) carrying this detector.
//!
//! The engine itself never calls the detector.
//!
//! ```text
//! job on parallel-3 ──► check("thread::sleep") ──► Err(BlockingOperationError)
//! job on boundedElastic-1 ──► check("thread::sleep") ──► Ok(())
//! caller thread ──► check("thread::sleep") ──► Ok(())
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::BlockingOperationError;

use super::context;

/// Detects blocking operations issued from non-blocking schedulers.
///
/// Cloning shares the violation counter; clones count as the same detector.
#[derive(Clone, Debug, Default)]
pub struct BlockingDetector {
    allowed: Arc<HashSet<String>>,
    violations: Arc<AtomicU64>,
}

impl BlockingDetector {
    /// Creates a detector with an empty allow-list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `operation` to the allow-list.
    ///
    /// Meant for construction time: clones made earlier keep their own copy
    /// of the allow-list.
    pub fn allow(mut self, operation: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.allowed).insert(operation.into());
        self
    }

    /// Reports that the caller is about to run `operation`.
    ///
    /// Fails if the calling thread is executing a job of a non-blocking
    /// scheduler this detector is attached to and `operation` is not
    /// allow-listed.
    pub fn check(&self, operation: &str) -> Result<(), BlockingOperationError> {
        let Some(ctx) = context::current() else {
            return Ok(());
        };
        let attached = ctx
            .detector
            .as_ref()
            .is_some_and(|d| Arc::ptr_eq(&d.violations, &self.violations));
        if !attached || ctx.kind.is_blocking_tolerant() {
            return Ok(());
        }
        if self.allowed.contains(operation) {
            return Ok(());
        }
        self.violations.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            operation,
            scheduler = ctx.kind.as_str(),
            "blocking call on non-blocking scheduler"
        );
        Err(BlockingOperationError {
            operation: operation.to_string(),
            context: ctx.kind.as_str().to_string(),
        })
    }

    /// Number of rejected operations so far.
    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }
}

/// Checks `operation` against the detector of the current context, if any.
///
/// Outside scheduled work, or on a scheduler without a detector, this is a
/// no-op.
pub fn check_blocking(operation: &str) -> Result<(), BlockingOperationError> {
    match context::current().and_then(|ctx| ctx.detector) {
        Some(detector) => detector.check(operation),
        None => Ok(()),
    }
}
