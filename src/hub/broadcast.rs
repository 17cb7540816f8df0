use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use super::registry::SubscriberRegistry;
use crate::{ResourceEvent, Result, WireMessage};

/// Outcome of one [`BroadcastHub::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub evicted: usize,
}

/// Pushes each published message to every registered subscriber.
///
/// Any subscriber whose delivery fails is deregistered and closed before
/// `publish` returns; the remaining subscribers still get the message.
pub struct BroadcastHub {
    registry: Arc<SubscriberRegistry>,
    // Serializes publishers so each subscriber sees messages in publish order.
    // Held independently of the registry lock.
    publish_lock: Mutex<()>,
}

impl BroadcastHub {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            registry,
            publish_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn publish(&self, message: &WireMessage) -> Delivery {
        let _order = self
            .publish_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let members = self.registry.snapshot();
        let mut delivery = Delivery::default();
        for (id, subscriber) in members {
            match subscriber.deliver(message) {
                Ok(()) => delivery.delivered += 1,
                Err(err) => {
                    if self.registry.deregister(id).is_some() {
                        delivery.evicted += 1;
                    }
                    subscriber.close();
                    if err.is_disconnect() {
                        debug!("evicted {id}: {err}");
                    } else {
                        debug!("evicted {id} after failed delivery: {err}");
                    }
                }
            }
        }
        delivery
    }

    pub fn publish_event(&self, event: &ResourceEvent) -> Result<Delivery> {
        let message = event.encode()?;
        Ok(self.publish(&message))
    }
}
