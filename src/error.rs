use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed resource: {0}")]
    MalformedResource(&'static str),
    #[error("subscriber closed")]
    SubscriberClosed,
    #[error("subscriber outbound buffer full")]
    SubscriberLagging,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[cfg(feature = "kube")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[cfg(feature = "kube")]
    #[error("api server returned {status}: {message}")]
    Api { status: u16, message: String },
    #[cfg(feature = "server")]
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Whether a delivery failure means the subscriber is gone for good.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::SubscriberClosed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
