use crate::config::Config;
use crate::error::SchedulerError;

use super::{BlockingDetector, Scheduler, SchedulerKind};

/// Builder for a private [`Scheduler`] instance.
///
/// # Example
/// ```
/// use sluice::schedulers::{BlockingDetector, Scheduler, SchedulerKind};
/// use sluice::Config;
///
/// let sched = Scheduler::builder(SchedulerKind::Parallel)
///     .config(Config { parallelism: 2, ..Config::default() })
///     .blocking_detector(BlockingDetector::new())
///     .build()
///     .unwrap();
/// assert_eq!(sched.name(), "parallel");
/// sched.dispose();
/// ```
pub struct SchedulerBuilder {
    kind: SchedulerKind,
    cfg: Config,
    detector: Option<BlockingDetector>,
}

impl SchedulerBuilder {
    /// Creates a builder seeded with [`Config::global`].
    pub fn new(kind: SchedulerKind) -> Self {
        Self {
            kind,
            cfg: Config::global().clone(),
            detector: None,
        }
    }

    /// Replaces the configuration used for pool sizing.
    pub fn config(mut self, cfg: Config) -> Self {
        self.cfg = cfg;
        self
    }

    /// Attaches a blocking-call detector to every job of this scheduler.
    pub fn blocking_detector(mut self, detector: BlockingDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Starts the runtime and returns the scheduler.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        Scheduler::start(self.kind, &self.cfg, self.detector, false)
    }
}
