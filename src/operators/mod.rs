//! Operator stages.
//!
//! Every stage is a [`Publisher`](crate::protocol::Publisher) wrapping its
//! upstream; subscribing it builds one per-subscription subscriber that is
//! handed upstream and acts as the subscription for downstream.

mod delay;
mod flat_map;
mod log;
mod map;
mod on_error;
mod peek;
mod schedule;
mod switch_if_empty;
mod take;
mod timeout;

pub(crate) use delay::{DelaySubscriptionPublisher, DelayedValue};
pub(crate) use flat_map::{FlatMapOptions, FlatMapPublisher};
pub(crate) use log::LogPublisher;
pub(crate) use map::{FilterPublisher, MapPublisher};
pub(crate) use on_error::{ResumePublisher, RetryPublisher};
pub(crate) use peek::{Hooks, PeekPublisher, SuccessPublisher};
pub(crate) use schedule::{PublishOnPublisher, SubscribeOnPublisher};
pub(crate) use switch_if_empty::SwitchIfEmptyPublisher;
pub(crate) use take::{CollectPublisher, TakePublisher};
pub(crate) use timeout::TimeoutPublisher;
