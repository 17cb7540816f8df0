//! Bridge from watch callbacks to the broadcast hub.

use std::future::Future;
use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;

use crate::hub::{BroadcastHub, Delivery};
use crate::{EventKind, ResourceEvent, ResourceMeta, Result};

/// Callbacks a watch source invokes for each observed change.
///
/// Callbacks may run concurrently. Every invocation is one logical event.
pub trait ResourceHandler: Send + Sync {
    fn on_add(&self, object: &Value);
    fn on_update(&self, old: Option<&Value>, new: &Value);
    fn on_delete(&self, object: &Value);
}

/// A long-lived feed of resource changes.
///
/// `subscribe` resolves once the feed is established; an error means the
/// feed could not be started at all. Retrying a broken feed afterwards is the
/// source's job.
pub trait WatchSource {
    type Subscription;

    fn subscribe(
        self,
        handler: Arc<dyn ResourceHandler>,
    ) -> impl Future<Output = Result<Self::Subscription>> + Send;
}

/// Turns watch callbacks into [`ResourceEvent`]s and publishes them.
pub struct EventRelay {
    hub: Arc<BroadcastHub>,
}

impl EventRelay {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self { hub }
    }

    /// Attaches this relay to `source` as its handler.
    pub async fn subscribe<S: WatchSource>(self, source: S) -> Result<S::Subscription> {
        source.subscribe(Arc::new(self)).await
    }

    pub fn relay(&self, kind: EventKind, object: &Value) -> Result<Delivery> {
        let meta = ResourceMeta::extract(object)?;
        let event = ResourceEvent::new(kind, meta);
        let delivery = self.hub.publish_event(&event)?;
        debug!(
            "{} {}/{} -> {} delivered, {} evicted",
            event.kind, event.namespace, event.name, delivery.delivered, delivery.evicted
        );
        Ok(delivery)
    }

    fn dispatch(&self, kind: EventKind, object: &Value) {
        if let Err(err) = self.relay(kind, object) {
            warn!("dropping {kind} event: {err}");
        }
    }
}

impl ResourceHandler for EventRelay {
    fn on_add(&self, object: &Value) {
        self.dispatch(EventKind::Added, object);
    }

    fn on_update(&self, _old: Option<&Value>, new: &Value) {
        self.dispatch(EventKind::Updated, new);
    }

    fn on_delete(&self, object: &Value) {
        self.dispatch(EventKind::Deleted, object);
    }
}
