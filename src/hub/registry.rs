use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{Result, WireMessage};

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn next() -> Self {
        SubscriberId(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outbound half of a live subscriber connection.
///
/// `deliver` must not block: implementations queue the message or fail. A
/// handle that has been closed returns `Error::SubscriberClosed` rather than
/// panicking.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, message: &WireMessage) -> Result<()>;

    /// Releases the connection. Idempotent.
    fn close(&self);
}

/// Thread-safe set of live subscribers.
///
/// A single mutex guards every structural operation. Iteration happens over
/// [`snapshot`](Self::snapshot) copies, never over the live map.
#[derive(Default)]
pub struct SubscriberRegistry {
    members: Mutex<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber. Returns `false` if `id` was already registered, in
    /// which case the existing entry is kept.
    pub fn register(&self, id: SubscriberId, subscriber: Arc<dyn Subscriber>) -> bool {
        let mut members = self.lock();
        if members.contains_key(&id) {
            return false;
        }
        members.insert(id, subscriber);
        true
    }

    /// Removes a subscriber if present. Absent ids are a no-op since eviction
    /// by a failed broadcast can race connection teardown.
    pub fn deregister(&self, id: SubscriberId) -> Option<Arc<dyn Subscriber>> {
        self.lock().remove(&id)
    }

    pub fn snapshot(&self) -> Vec<(SubscriberId, Arc<dyn Subscriber>)> {
        self.lock()
            .iter()
            .map(|(id, subscriber)| (*id, Arc::clone(subscriber)))
            .collect()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Empties the registry and closes every handle that was in it.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_id, subscriber) in drained {
            subscriber.close();
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, Arc<dyn Subscriber>>> {
        // Every critical section leaves the map consistent, so a panic
        // elsewhere does not invalidate it.
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.len())
            .finish()
    }
}
