//! WebSocket boundary: accepting subscribers and tracking their lifecycle.

pub mod config;
pub mod lifecycle;
pub mod listener;
pub mod ws;

pub use config::ServerConfig;
pub use lifecycle::{CloseReason, ConnectionManager, Duplex};
pub use listener::Server;
pub use ws::{WsConnection, WsSubscriber};
