//! Scheduler identifiers.

use std::fmt;
use std::str::FromStr;

use crate::error::SchedulerError;

/// Names of the built-in execution contexts.
///
/// | Kind | Threads | Blocking calls |
/// |------|---------|----------------|
/// | `single` | one, `single-1` | not allowed |
/// | `parallel` | CPU count, `parallel-N` | not allowed |
/// | `boundedElastic` | grows up to a cap, `boundedElastic-N` | allowed |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerKind {
    /// One dedicated thread.
    Single,
    /// Bounded, growing pool of blocking-tolerant threads.
    BoundedElastic,
    /// Fixed pool sized to the CPU count.
    Parallel,
}

impl SchedulerKind {
    /// Returns the stable identifier (`single`, `boundedElastic`, `parallel`).
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerKind::Single => "single",
            SchedulerKind::BoundedElastic => "boundedElastic",
            SchedulerKind::Parallel => "parallel",
        }
    }

    /// True for contexts where blocking calls are expected.
    pub fn is_blocking_tolerant(&self) -> bool {
        matches!(self, SchedulerKind::BoundedElastic)
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulerKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(SchedulerKind::Single),
            "boundedElastic" => Ok(SchedulerKind::BoundedElastic),
            "parallel" => Ok(SchedulerKind::Parallel),
            other => Err(SchedulerError::UnknownName {
                name: other.to_string(),
            }),
        }
    }
}
