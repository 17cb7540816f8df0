//! Subscriber registry and broadcast fan-out.
//!
//! The registry is the single source of truth for who receives events. The
//! hub snapshots it under the registry lock and delivers outside of it, so a
//! slow subscriber never blocks registration of new ones.

pub mod broadcast;
pub mod local;
pub mod registry;

pub use broadcast::{BroadcastHub, Delivery};
pub use local::LocalSubscriber;
pub use registry::{Subscriber, SubscriberId, SubscriberRegistry};
