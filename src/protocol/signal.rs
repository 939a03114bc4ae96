//! # Signals observed by a subscriber.
//!
//! [`Signal`] is the recorded form of a subscriber callback. It is what the
//! verification harness compares against and what `log()` reports.

use crate::error::FlowError;

/// One protocol signal.
///
/// Ordering: `Subscribe` first, then zero or more `Next`, then at most one of
/// `Error` / `Complete`.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal<T> {
    /// `on_subscribe` was called.
    Subscribe,
    /// `on_next` with the delivered value.
    Next(T),
    /// `on_error` with the terminal error.
    Error(FlowError),
    /// `on_complete`.
    Complete,
}

/// Payload-free classification of [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Subscribe,
    Next,
    Error,
    Complete,
}

impl<T> Signal<T> {
    /// Returns the payload-free kind of this signal.
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Subscribe => SignalKind::Subscribe,
            Signal::Next(_) => SignalKind::Next,
            Signal::Error(_) => SignalKind::Error,
            Signal::Complete => SignalKind::Complete,
        }
    }

    /// True for `Error` and `Complete`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Signal::Error(_) | Signal::Complete)
    }

    /// Returns the value of a `Next` signal.
    pub fn into_value(self) -> Option<T> {
        match self {
            Signal::Next(v) => Some(v),
            _ => None,
        }
    }
}

impl SignalKind {
    /// Returns a short stable label used in logs and verification messages.
    pub fn as_label(&self) -> &'static str {
        match self {
            SignalKind::Subscribe => "onSubscribe",
            SignalKind::Next => "onNext",
            SignalKind::Error => "onError",
            SignalKind::Complete => "onComplete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_signals_are_error_and_complete() {
        assert!(!Signal::<u8>::Subscribe.is_terminal());
        assert!(!Signal::Next(1).is_terminal());
        assert!(Signal::<u8>::Error(FlowError::upstream("x")).is_terminal());
        assert!(Signal::<u8>::Complete.is_terminal());
    }

    #[test]
    fn labels_follow_callback_names() {
        assert_eq!(Signal::Next("a").kind().as_label(), "onNext");
        assert_eq!(Signal::Next("a").into_value(), Some("a"));
        assert_eq!(Signal::<&str>::Complete.into_value(), None);
    }
}
