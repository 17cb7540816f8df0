//! In-process subscriber backed by a bounded channel.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, PoisonError};

use super::registry::Subscriber;
use crate::{Error, Result, WireMessage};

/// Subscriber that hands messages to a [`Receiver`] in the same process.
///
/// A full channel counts as a failed delivery, as does a dropped receiver.
pub struct LocalSubscriber {
    tx: Mutex<Option<SyncSender<WireMessage>>>,
}

impl LocalSubscriber {
    pub fn channel(capacity: usize) -> (Self, Receiver<WireMessage>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Subscriber for LocalSubscriber {
    fn deliver(&self, message: &WireMessage) -> Result<()> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(Error::SubscriberClosed)?;
        tx.try_send(message.clone()).map_err(|err| match err {
            TrySendError::Full(_) => Error::SubscriberLagging,
            TrySendError::Disconnected(_) => Error::SubscriberClosed,
        })
    }

    fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
