//! # Example: retry_with_backoff
//!
//! A flaky source fails twice before succeeding. `retry_backoff` waits
//! between attempts on the `parallel` scheduler, growing the delay
//! exponentially with jitter.
//!
//! ## Flow
//! ```text
//! subscribe ──► attempt 1 ──► Err("boom #1")
//!           ──► wait ≈100ms ──► attempt 2 ──► Err("boom #2")
//!           ──► wait ≈200ms ──► attempt 3 ──► Ok("payload")
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example retry_with_backoff
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use sluice::{BackoffPolicy, FlowError, JitterPolicy, Maybe};

static ATTEMPTS: AtomicU64 = AtomicU64::new(0);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let flaky = Maybe::from_callable(|| {
        let attempt = ATTEMPTS.fetch_add(1, Ordering::Relaxed) + 1;
        println!("[flaky] attempt {attempt}");
        if attempt <= 2 {
            Err(FlowError::upstream(format!("boom #{attempt}")))
        } else {
            Ok("payload")
        }
    });

    let backoff = BackoffPolicy {
        max_retries: 5,
        first: Duration::from_millis(100),
        max: Duration::from_secs(2),
        factor: 2.0,
        jitter: JitterPolicy::Equal,
    };

    let started = Instant::now();
    let value = flaky
        .retry_backoff(backoff)
        .block(Duration::from_secs(10))?;
    println!("got {value:?} after {:?}", started.elapsed());
    Ok(())
}
