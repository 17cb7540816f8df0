//! Fan-out of resource change events to live subscribers.
//!
//! A single producer (the [`relay::EventRelay`], fed by a watch source such as
//! the Kubernetes pod watcher) publishes serialized events through the
//! [`hub::BroadcastHub`] to every subscriber currently held in the
//! [`hub::SubscriberRegistry`]. Subscribers come and go at any time; a failed
//! delivery evicts the subscriber on the spot.

pub mod error;
pub mod event;
pub mod hub;
pub mod relay;

#[cfg(feature = "runtime")]
pub mod shutdown;

#[cfg(feature = "kube")]
pub mod kube;

#[cfg(feature = "server")]
pub mod server;

pub use error::{Error, Result};
pub use event::{EventKind, ResourceEvent, ResourceMeta, WireMessage};
pub use hub::{BroadcastHub, Delivery, LocalSubscriber, Subscriber, SubscriberId, SubscriberRegistry};
pub use relay::{EventRelay, ResourceHandler, WatchSource};
