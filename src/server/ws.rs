use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::debug;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use super::config::ServerConfig;
use super::lifecycle::Duplex;
use crate::hub::Subscriber;
use crate::{Error, Result, WireMessage};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Outbound half of a WebSocket subscriber.
///
/// `deliver` only enqueues; a dedicated writer task owns the socket sink and
/// preserves enqueue order. A full queue or a dead writer fails the delivery.
pub struct WsSubscriber {
    tx: Mutex<Option<mpsc::Sender<WireMessage>>>,
    closed: Arc<Notify>,
}

impl Subscriber for WsSubscriber {
    fn deliver(&self, message: &WireMessage) -> Result<()> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(Error::SubscriberClosed)?;
        tx.try_send(message.clone()).map_err(|err| match err {
            TrySendError::Full(_) => Error::SubscriberLagging,
            TrySendError::Closed(_) => Error::SubscriberClosed,
        })
    }

    fn close(&self) {
        // Dropping the only sender lets the writer drain and send a Close frame.
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.closed.notify_one();
    }
}

pub struct WsConnection {
    subscriber: Arc<WsSubscriber>,
    inbound: WsStream,
    writer: JoinHandle<()>,
    closed: Arc<Notify>,
    write_timeout: Duration,
}

impl WsConnection {
    /// Performs the upgrade handshake on a freshly accepted socket.
    pub async fn accept(stream: TcpStream, config: &ServerConfig) -> Result<Self> {
        let path = config.path.clone();
        let ws = accept_hdr_async(stream, move |req: &Request, resp: Response| {
            if req.uri().path() == path {
                Ok(resp)
            } else {
                let mut reject = ErrorResponse::new(Some(format!("no route for {}", req.uri().path())));
                *reject.status_mut() = StatusCode::NOT_FOUND;
                Err(reject)
            }
        })
        .await?;
        Ok(Self::from_stream(ws, config))
    }

    pub fn from_stream(ws: WebSocketStream<TcpStream>, config: &ServerConfig) -> Self {
        let (sink, inbound) = ws.split();
        let (tx, rx) = mpsc::channel(config.outbound_buffer.max(1));
        let closed = Arc::new(Notify::new());
        let writer = tokio::spawn(write_loop(sink, rx, config.write_timeout, Arc::clone(&closed)));
        Self {
            subscriber: Arc::new(WsSubscriber {
                tx: Mutex::new(Some(tx)),
                closed: Arc::clone(&closed),
            }),
            inbound,
            writer,
            closed,
            write_timeout: config.write_timeout,
        }
    }
}

impl Duplex for WsConnection {
    fn subscriber(&self) -> Arc<dyn Subscriber> {
        self.subscriber.clone()
    }

    fn recv(&mut self) -> impl Future<Output = Option<Result<()>>> + Send {
        async move {
            // An evicted subscriber or a dead writer ends the connection even
            // when the peer never sends anything.
            let inbound = tokio::select! {
                _ = self.closed.notified() => return None,
                inbound = self.inbound.next() => inbound,
            };
            match inbound {
                None | Some(Ok(Message::Close(_))) => None,
                Some(Ok(_)) => Some(Ok(())),
                Some(Err(err)) => Some(Err(err.into())),
            }
        }
    }

    fn close(self) -> impl Future<Output = ()> + Send {
        async move {
            self.subscriber.close();
            let mut writer = self.writer;
            if timeout(self.write_timeout, &mut writer).await.is_err() {
                writer.abort();
            }
        }
    }
}

async fn write_loop(
    mut sink: WsSink,
    mut rx: mpsc::Receiver<WireMessage>,
    write_timeout: Duration,
    closed: Arc<Notify>,
) {
    let drained = loop {
        let Some(message) = rx.recv().await else {
            break true;
        };
        let frame = Message::Text(message.to_string());
        match timeout(write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!("subscriber write failed: {err}");
                break false;
            }
            Err(_) => {
                debug!("subscriber write timed out after {write_timeout:?}");
                break false;
            }
        }
    };
    if drained {
        let _ = timeout(write_timeout, sink.close()).await;
    }
    closed.notify_one();
}
