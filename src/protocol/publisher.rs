use std::sync::Arc;

use super::SubscriberRef;

/// Anything that can be subscribed to.
///
/// Implementations must be reusable: each `subscribe` call starts an
/// independent run with its own subscription and state.
pub trait Publisher<T>: Send + Sync + 'static {
    /// Attaches `subscriber`, which receives `on_subscribe` before anything else.
    fn subscribe(&self, subscriber: SubscriberRef<T>);
}

/// Shared, type-erased publisher handle.
pub type PublisherRef<T> = Arc<dyn Publisher<T>>;
