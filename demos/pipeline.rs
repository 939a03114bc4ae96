//! # Example: pipeline
//!
//! Generates a range on `boundedElastic`, transforms it, and delivers the
//! results on `single`. Every stage logs the scheduler it ran on.
//!
//! ## Flow
//! ```text
//! Flow::range(1, 6)            ── generated on boundedElastic-N (subscribe_on)
//!   ├─► map(x * 10)
//!   ├─► flat_map(x ─► [x, x+1])
//!   ├─► publish_on(single)     ── delivered on single-1
//!   └─► collect_list().block()
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example pipeline
//! ```

use std::time::Duration;

use sluice::schedulers::current_context;
use sluice::{Flow, Scheduler};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let values = Flow::range(1, 6)
        .do_on_next(|x| println!("[generate] {x} on {:?}", current_context()))
        .subscribe_on(&Scheduler::bounded_elastic())
        .map(|x| x * 10)
        .flat_map_sequential(|x| Flow::just([x, x + 1]))
        .publish_on(&Scheduler::single())
        .do_on_next(|x| println!("[deliver]  {x} on {:?}", current_context()))
        .log_as("pipeline")
        .collect_list()
        .block(Duration::from_secs(5))?;

    println!("result: {values:?}");
    Ok(())
}
