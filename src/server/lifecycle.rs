//! Per-connection lifecycle: `Accepting -> Active -> Closed`.
//!
//! A connection is registered only once its handshake succeeds, stays
//! registered while the inbound side is readable, and is deregistered on
//! every way out of `Active` (peer close, eviction, read error, shutdown,
//! task abort). The handshake itself is bounded and yields to shutdown.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::hub::{Subscriber, SubscriberId, SubscriberRegistry};
use crate::shutdown::Shutdown;
use crate::Result;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// An upgraded bidirectional connection.
///
/// The outbound side is exposed as a [`Subscriber`]. The inbound side exists
/// only to notice that the peer went away; payloads are discarded.
pub trait Duplex: Send {
    fn subscriber(&self) -> Arc<dyn Subscriber>;

    /// `Some(Ok(()))` for any inbound frame, `Some(Err(_))` on a read failure,
    /// `None` once the connection is closed, either by the peer or because
    /// its subscriber was closed locally (e.g. evicted by the hub).
    fn recv(&mut self) -> impl Future<Output = Option<Result<()>>> + Send;

    fn close(self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    HandshakeFailed,
    Closed,
    ReadError,
    Shutdown,
}

struct Registration {
    registry: Arc<SubscriberRegistry>,
    id: SubscriberId,
}

impl Registration {
    fn new(registry: Arc<SubscriberRegistry>, subscriber: Arc<dyn Subscriber>) -> Self {
        let id = SubscriberId::next();
        registry.register(id, subscriber);
        Self { registry, id }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

pub struct ConnectionManager {
    registry: Arc<SubscriberRegistry>,
    shutdown: Shutdown,
    handshake_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(registry: Arc<SubscriberRegistry>, shutdown: Shutdown) -> Self {
        Self {
            registry,
            shutdown,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Drives one connection from handshake to teardown.
    pub async fn serve<D, H>(mut self, peer: impl Display, handshake: H) -> CloseReason
    where
        D: Duplex,
        H: Future<Output = Result<D>>,
    {
        let handshake = tokio::select! {
            _ = self.shutdown.wait() => {
                debug!("{peer}: shutdown before upgrade completed");
                return CloseReason::Shutdown;
            }
            result = tokio::time::timeout(self.handshake_timeout, handshake) => result,
        };
        let mut conn = match handshake {
            Ok(Ok(conn)) => conn,
            Ok(Err(err)) => {
                warn!("{peer}: upgrade failed: {err}");
                return CloseReason::HandshakeFailed;
            }
            Err(_) => {
                warn!("{peer}: upgrade timed out after {:?}", self.handshake_timeout);
                return CloseReason::HandshakeFailed;
            }
        };

        let registration = Registration::new(Arc::clone(&self.registry), conn.subscriber());
        info!(
            "{peer}: subscriber {} connected ({} active)",
            registration.id,
            self.registry.len()
        );

        let reason = loop {
            tokio::select! {
                _ = self.shutdown.wait() => break CloseReason::Shutdown,
                inbound = conn.recv() => match inbound {
                    Some(Ok(())) => continue,
                    Some(Err(err)) => {
                        debug!("{peer}: read failed: {err}");
                        break CloseReason::ReadError;
                    }
                    None => break CloseReason::Closed,
                },
            }
        };

        let id = registration.id;
        drop(registration);
        conn.close().await;
        info!(
            "{peer}: subscriber {id} disconnected ({reason:?}, {} active)",
            self.registry.len()
        );
        reason
    }
}
