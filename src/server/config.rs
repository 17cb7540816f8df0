use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Request path that is upgraded; every other path gets a 404.
    pub path: String,
    /// Messages queued per subscriber before it counts as lagging and is evicted.
    pub outbound_buffer: usize,
    /// Upper bound on a single frame write to a subscriber socket.
    pub write_timeout: Duration,
    /// How long an accepted socket may take to complete the upgrade.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            outbound_buffer: 256,
            write_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}
