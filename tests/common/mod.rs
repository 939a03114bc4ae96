use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Deadline for verifications that involve scheduler threads.
pub const WAIT: Duration = Duration::from_secs(5);

/// Routes `tracing` output to the test harness; `RUST_LOG` selects levels.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `cond` until it holds or `WAIT` elapses.
#[allow(dead_code)]
pub fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
