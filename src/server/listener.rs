use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinSet;

use super::config::ServerConfig;
use super::lifecycle::ConnectionManager;
use super::ws::WsConnection;
use crate::hub::SubscriberRegistry;
use crate::shutdown::Shutdown;
use crate::Result;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accept loop that turns each inbound WebSocket into a registered subscriber.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    registry: Arc<SubscriberRegistry>,
}

impl Server {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: ServerConfig,
        registry: Arc<SubscriberRegistry>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            registry,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until `shutdown` fires, then waits for every connection to be
    /// torn down before returning.
    pub async fn run(self, shutdown: Shutdown) -> Result<()> {
        info!(
            "listening on {} (path {})",
            self.local_addr()?,
            self.config.path
        );
        let mut connections = JoinSet::new();
        let mut stop = shutdown.clone();

        loop {
            tokio::select! {
                _ = stop.wait() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let config = Arc::clone(&self.config);
                        let manager = ConnectionManager::new(Arc::clone(&self.registry), shutdown.clone())
                            .with_handshake_timeout(self.config.handshake_timeout);
                        connections.spawn(async move {
                            manager.serve(peer, WsConnection::accept(stream, &config)).await
                        });
                    }
                    Err(err) => {
                        warn!("accept failed: {err}");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        warn!("connection task failed: {err}");
                    }
                }
            }
        }

        info!("shutting down, closing {} connections", connections.len());
        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                warn!("connection task failed: {err}");
            }
        }
        let leftover = self.registry.close_all();
        if leftover > 0 {
            warn!("closed {leftover} subscribers that outlived their connection");
        }
        Ok(())
    }
}
