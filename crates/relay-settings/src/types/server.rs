use serde::{Deserialize, Serialize};

/// Listener and per-connection transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Interval between keep-alive pings, in milliseconds.
    pub ping_interval_ms: u64,
    /// How long to wait for any frame after a ping, in milliseconds.
    pub ping_timeout_ms: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Capacity of each peer's outbound queue.
    pub send_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            ping_interval_ms: 30_000,
            ping_timeout_ms: 10_000,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
        }
    }
}
