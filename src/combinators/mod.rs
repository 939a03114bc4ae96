//! # Multi-source combinators.
//!
//! | function | subscription | output order | errors |
//! |---|---|---|---|
//! | [`concat`] | one source at a time | declaration | first terminates |
//! | [`concat_delay_error`] | one source at a time | declaration | held to the end |
//! | [`merge`] | all at once | arrival | first terminates |
//! | [`merge_sequential`] | all at once | declaration | first terminates |
//! | [`merge_delay_error`] | at most `concurrency` | arrival | held to the end |
//! | [`zip`] | all at once | per index | first terminates |
//! | [`combine_latest`] | all at once | arrival | first terminates |
//!
//! The merge family runs on the flat-map engine, fed by the list of sources.

mod combine_latest;
mod concat;
mod zip;

use std::sync::Arc;

use crate::flow::Flow;
use crate::flow::sources::IterSource;
use crate::operators::{FlatMapOptions, FlatMapPublisher};
use crate::protocol::PublisherRef;

pub use combine_latest::{combine_latest, combine_latest2};
pub use zip::{zip, zip2, zip3};

use concat::ConcatPublisher;

/// Emits every item of each source in turn; the first error terminates.
pub fn concat<T: Send + 'static>(sources: Vec<Flow<T>>) -> Flow<T> {
    let sources = sources.iter().map(Flow::as_publisher).collect();
    Flow::from_arc(Arc::new(ConcatPublisher::new(sources, false)))
}

/// Like [`concat`], but a failing source does not stop the remaining ones.
/// The first error is emitted once every source has run.
pub fn concat_delay_error<T: Send + 'static>(sources: Vec<Flow<T>>) -> Flow<T> {
    let sources = sources.iter().map(Flow::as_publisher).collect();
    Flow::from_arc(Arc::new(ConcatPublisher::new(sources, true)))
}

/// Subscribes every source at once and forwards items as they arrive.
pub fn merge<T: Send + 'static>(sources: Vec<Flow<T>>) -> Flow<T> {
    let concurrency = sources.len().max(1);
    merge_with_options(
        sources,
        FlatMapOptions {
            concurrency,
            ordered: false,
            delay_error: false,
        },
    )
}

/// Subscribes every source at once; output keeps declaration order.
pub fn merge_sequential<T: Send + 'static>(sources: Vec<Flow<T>>) -> Flow<T> {
    let concurrency = sources.len().max(1);
    merge_with_options(
        sources,
        FlatMapOptions {
            concurrency,
            ordered: true,
            delay_error: false,
        },
    )
}

/// Keeps at most `concurrency` sources active; errors are held until every
/// source has finished and the first one is emitted then.
pub fn merge_delay_error<T: Send + 'static>(concurrency: usize, sources: Vec<Flow<T>>) -> Flow<T> {
    merge_with_options(
        sources,
        FlatMapOptions {
            concurrency: concurrency.max(1),
            ordered: false,
            delay_error: true,
        },
    )
}

fn merge_with_options<T: Send + 'static>(sources: Vec<Flow<T>>, opts: FlatMapOptions) -> Flow<T> {
    let sources: Vec<PublisherRef<T>> = sources.iter().map(Flow::as_publisher).collect();
    let outer: PublisherRef<PublisherRef<T>> = Arc::new(IterSource::new(sources));
    Flow::from_arc(Arc::new(FlatMapPublisher::new(
        outer,
        |source: PublisherRef<T>| source,
        opts,
    )))
}
